//! Wire formats for the dashboard WebSocket.
//!
//! Inbound frames are JSON objects of the form `{"event": ..., "data": ..., "timestamp": ...}`.
//! Outbound messages are either sent verbatim (text) or JSON-encoded (structured values).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use super::error::WsError;

/// Outbound liveness probe.
pub const PING: &str = "ping";

/// Event name of the inbound liveness acknowledgment. Never forwarded to subscribers.
pub const PONG_EVENT: &str = "pong";

/// Timestamp attached to an inbound frame by the server.
///
/// The dashboard backend sends naive ISO-8601 strings; other producers send Unix milliseconds.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Text(String),
    Number(serde_json::Number),
}

impl Timestamp {
    /// Interpret the timestamp as a UTC instant.
    ///
    /// Text is tried as RFC 3339 first, then as a naive ISO-8601 date-time assumed to be UTC.
    /// Numbers are Unix milliseconds.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                        .map(|naive| naive.and_utc())
                })
                .ok(),
            Self::Number(number) => number
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }
}

/// A decoded inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl InboundFrame {
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.event == PONG_EVENT
    }
}

/// Decode a text frame into an [`InboundFrame`].
pub fn parse_frame(text: &str) -> Result<InboundFrame, WsError> {
    serde_json::from_str(text).map_err(WsError::MessageParse)
}

/// A message handed to [`crate::ws::ConnectionManager::send`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Sent as-is
    Text(String),
    /// JSON-encoded before sending
    Json(Value),
}

impl OutboundMessage {
    #[must_use]
    pub fn to_frame(&self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.clone().into()),
            Self::Json(value) => Message::Text(value.to_string().into()),
        }
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for OutboundMessage {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}
