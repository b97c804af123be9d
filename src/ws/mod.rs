//! Core WebSocket infrastructure.
//!
//! This module keeps a single connection to the dashboard server alive and relays what
//! arrives on it to subscribers.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Public handle; drives the connection lifecycle on a background task
//! - [`OutboundQueue`](queue::OutboundQueue): Ordered buffer for messages sent while disconnected
//! - [`ReconnectPolicy`](reconnect::ReconnectPolicy): Exponential backoff with an attempt budget
//! - [`KeepaliveMonitor`](keepalive::KeepaliveMonitor): `"ping"` interval and `pong` timeout
//! - [`EventDispatcher`]: Per-event handler registry with panic isolation
//!
//! # Example
//!
//! ```no_run
//! use dashboard_realtime::ws::config::Config;
//! use dashboard_realtime::ws::{ConnectionManager, Event, EventKind};
//!
//! # async fn example() -> dashboard_realtime::Result<()> {
//! let connection = ConnectionManager::new("ws://127.0.0.1:8000/ws", Config::default())?;
//!
//! connection.on(EventKind::Reconnecting, |event| {
//!     if let Event::Reconnecting { attempt, delay } = event {
//!         println!("reconnecting in {delay:?} (attempt {attempt})");
//!     }
//! });
//! connection.connect()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod keepalive;
pub mod message;
pub mod queue;
pub mod reconnect;

pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::{EventDispatcher, Handler, HandlerId, Subscription};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use event::{ApplicationEvent, CloseInfo, Event, EventKind};
pub use message::{OutboundMessage, Timestamp};
