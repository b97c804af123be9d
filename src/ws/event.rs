//! Events announced by the connection manager.
//!
//! Lifecycle events form a closed set; server-defined events travel as
//! [`Event::Application`] and are keyed by their own name.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use super::message::{InboundFrame, Timestamp};

/// Close code for a normal, requested closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the peer's close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code reported when the transport went away without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Why a transport closed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn abnormal<S: Into<String>>(reason: S) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }

    #[must_use]
    pub const fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// A server-defined event relayed from an inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationEvent {
    pub name: String,
    pub data: Value,
    pub timestamp: Option<Timestamp>,
}

impl From<InboundFrame> for ApplicationEvent {
    fn from(frame: InboundFrame) -> Self {
        Self {
            name: frame.event,
            data: frame.data,
            timestamp: frame.timestamp,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The transport opened
    Connected,
    /// The transport closed, for any reason
    Disconnected(CloseInfo),
    /// A reconnection attempt has been scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// The reconnection budget is spent; only an explicit `connect()` resumes
    MaxAttemptsReached,
    /// The transport reported an error
    Error { message: String },
    /// A server-defined event
    Application(ApplicationEvent),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected(_) => EventKind::Disconnected,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::MaxAttemptsReached => EventKind::MaxAttemptsReached,
            Self::Error { .. } => EventKind::Error,
            Self::Application(event) => EventKind::Application(event.name.clone()),
        }
    }

    #[must_use]
    pub fn as_application(&self) -> Option<&ApplicationEvent> {
        match self {
            Self::Application(event) => Some(event),
            _ => None,
        }
    }
}

/// Subscription key for [`Event`]s.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    MaxAttemptsReached,
    Error,
    Application(String),
}

impl EventKind {
    pub fn application<S: Into<String>>(name: S) -> Self {
        Self::Application(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::MaxAttemptsReached => "maxAttemptsReached",
            Self::Error => "error",
            Self::Application(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
