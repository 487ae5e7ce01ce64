#![forbid(unsafe_code)]

use super::{DeviceKey, PortName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    AttributeChanged,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::AttributeChanged => "attribute_changed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute that differs between two observations. Values are rendered
/// as JSON so any attribute type fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// Append-only record in the connection log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub kind: EventKind,
    pub device: Option<DeviceKey>,
    pub port: Option<PortName>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionEvent {
    pub fn device(kind: EventKind, key: DeviceKey, description: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            device: Some(key),
            port: None,
            description,
            changes: Vec::new(),
            timestamp,
        }
    }

    pub fn port(
        kind: EventKind,
        name: PortName,
        device: Option<DeviceKey>,
        description: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            device,
            port: Some(name),
            description,
            changes: Vec::new(),
            timestamp,
        }
    }

    pub fn error(description: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::Error,
            device: None,
            port: None,
            description,
            changes: Vec::new(),
            timestamp,
        }
    }

    pub fn with_changes(mut self, changes: Vec<AttributeChange>) -> Self {
        self.changes = changes;
        self
    }
}

/// Every event produced by one monitoring cycle, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub cycle_id: u64,
    pub events: Vec<ConnectionEvent>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// A stored event together with its position in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub id: i64,
    pub cycle_id: u64,
    pub seq: u32,
    #[serde(flatten)]
    pub event: ConnectionEvent,
}
