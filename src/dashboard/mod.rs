//! Typed view of the notifications the dashboard server broadcasts.
//!
//! The connection layer relays every server event as an
//! [`ApplicationEvent`](crate::ws::ApplicationEvent); this module
//! decodes the ones the dashboard knows about.
//!
//! # Example
//!
//! ```no_run
//! use dashboard_realtime::dashboard::{self, Notification};
//! use dashboard_realtime::ws::ConnectionManager;
//! use dashboard_realtime::ws::config::Config;
//!
//! # fn example() -> dashboard_realtime::Result<()> {
//! let connection = ConnectionManager::new("ws://127.0.0.1:8000/ws", Config::default())?;
//!
//! let _subscriptions = dashboard::subscribe(&connection, |notification, _timestamp| {
//!     if let Notification::ProjectUpdated(update) = notification {
//!         println!("project changed: {}", update.project);
//!     }
//! });
//! connection.connect()?;
//! # Ok(())
//! # }
//! ```

pub mod types;

use std::sync::Arc;

pub use types::{
    Notification, ProjectUpdated, ScanCompleted, ScanProgress, ScanStarted, TopicChanged,
};

use crate::ws::message::Timestamp;
use crate::ws::{ConnectionManager, EventKind, Subscription};

/// Register `handler` for every [`Notification`] kind.
///
/// Events whose payload does not decode are skipped. Returns one [`Subscription`] per
/// event name.
pub fn subscribe<F>(connection: &ConnectionManager, handler: F) -> Vec<Subscription>
where
    F: Fn(&Notification, Option<&Timestamp>) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);

    Notification::EVENT_NAMES
        .iter()
        .map(|name| {
            let handler = Arc::clone(&handler);
            connection.on(EventKind::application(*name), move |event| {
                if let Some(app) = event.as_application()
                    && let Some(notification) = Notification::from_event(app)
                {
                    handler(&notification, app.timestamp.as_ref());
                }
            })
        })
        .collect()
}
