use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ws::ApplicationEvent;

pub const PROJECT_UPDATED: &str = "project_updated";
pub const TOPIC_CHANGED: &str = "topic_changed";
pub const SCAN_STARTED: &str = "scan_started";
pub const SCAN_PROGRESS: &str = "scan_progress";
pub const SCAN_COMPLETED: &str = "scan_completed";

/// A project's stored state changed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct ProjectUpdated {
    /// Full project record as stored by the server
    pub project: Value,
}

/// A topic inside a project was created, edited or removed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct TopicChanged {
    pub project_id: i64,
    pub topic: Value,
}

/// A workspace scan began.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct ScanStarted {
    pub scan_id: String,
    /// Set when only a single project is being rescanned
    #[serde(default)]
    pub project_id: Option<i64>,
    /// Scan scope, e.g. `full`
    #[serde(rename = "type")]
    pub scan_type: String,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct ScanProgress {
    pub scan_id: String,
    /// Completion ratio reported by the scanner
    pub progress: f64,
    /// Item currently being scanned
    pub current: String,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct ScanCompleted {
    pub scan_id: String,
    pub result: Value,
}

/// Server notifications understood by the dashboard.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ProjectUpdated(ProjectUpdated),
    TopicChanged(TopicChanged),
    ScanStarted(ScanStarted),
    ScanProgress(ScanProgress),
    ScanCompleted(ScanCompleted),
}

impl Notification {
    /// Event names carrying a [`Notification`].
    pub const EVENT_NAMES: [&'static str; 5] = [
        PROJECT_UPDATED,
        TOPIC_CHANGED,
        SCAN_STARTED,
        SCAN_PROGRESS,
        SCAN_COMPLETED,
    ];

    /// Decode a relayed server event.
    ///
    /// Returns `None` for other event names and for payloads that do not match.
    #[must_use]
    pub fn from_event(event: &ApplicationEvent) -> Option<Self> {
        let data = event.data.clone();
        let decoded = match event.name.as_str() {
            PROJECT_UPDATED => serde_json::from_value(data).map(Self::ProjectUpdated),
            TOPIC_CHANGED => serde_json::from_value(data).map(Self::TopicChanged),
            SCAN_STARTED => serde_json::from_value(data).map(Self::ScanStarted),
            SCAN_PROGRESS => serde_json::from_value(data).map(Self::ScanProgress),
            SCAN_COMPLETED => serde_json::from_value(data).map(Self::ScanCompleted),
            _ => return None,
        };

        decoded
            .inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::debug!(event = %event.name, error = %e, "Unexpected notification payload");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_json::Error = e;
            })
            .ok()
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProjectUpdated(_) => PROJECT_UPDATED,
            Self::TopicChanged(_) => TOPIC_CHANGED,
            Self::ScanStarted(_) => SCAN_STARTED,
            Self::ScanProgress(_) => SCAN_PROGRESS,
            Self::ScanCompleted(_) => SCAN_COMPLETED,
        }
    }
}
