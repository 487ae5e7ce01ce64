#![forbid(unsafe_code)]

use crate::domain::{
    AttributeChange, ConnectionEvent, DeviceKey, DeviceRecord, EventKind, PortName, PortRecord,
};
use crate::snapshot::Snapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A lifecycle transition found by comparing two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    DeviceConnected {
        key: DeviceKey,
        record: DeviceRecord,
    },
    DeviceDisconnected {
        key: DeviceKey,
        record: DeviceRecord,
    },
    DeviceChanged {
        key: DeviceKey,
        record: DeviceRecord,
        delta: Vec<AttributeChange>,
    },
    /// Two distinct records resolved to the same identity key.
    Collision { key: DeviceKey },
    PortConnected {
        name: PortName,
        record: PortRecord,
    },
    PortDisconnected {
        name: PortName,
        record: PortRecord,
    },
    PortChanged {
        name: PortName,
        record: PortRecord,
        delta: Vec<AttributeChange>,
    },
}

impl Change {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceConnected { .. } | Self::PortConnected { .. } => EventKind::Connected,
            Self::DeviceDisconnected { .. } | Self::PortDisconnected { .. } => {
                EventKind::Disconnected
            }
            Self::DeviceChanged { .. } | Self::PortChanged { .. } => EventKind::AttributeChanged,
            Self::Collision { .. } => EventKind::Error,
        }
    }

    pub fn is_device(&self) -> bool {
        matches!(
            self,
            Self::DeviceConnected { .. }
                | Self::DeviceDisconnected { .. }
                | Self::DeviceChanged { .. }
                | Self::Collision { .. }
        )
    }

    /// Render the change as a log entry stamped with `timestamp`.
    pub fn to_event(&self, timestamp: DateTime<Utc>) -> ConnectionEvent {
        let kind = self.kind();
        match self {
            Self::DeviceConnected { key, record } => ConnectionEvent::device(
                kind,
                key.clone(),
                format!("Device connected: {}", record.display_name()),
                timestamp,
            ),
            Self::DeviceDisconnected { key, record } => ConnectionEvent::device(
                kind,
                key.clone(),
                format!("Device disconnected: {}", record.display_name()),
                timestamp,
            ),
            Self::DeviceChanged { key, record, delta } => ConnectionEvent::device(
                kind,
                key.clone(),
                format!("Device changed: {} ({})", record.display_name(), fields(delta)),
                timestamp,
            )
            .with_changes(delta.clone()),
            Self::Collision { key } => ConnectionEvent {
                device: Some(key.clone()),
                ..ConnectionEvent::error(
                    format!("Identity collision: several devices share key {key}"),
                    timestamp,
                )
            },
            Self::PortConnected { name, record } => ConnectionEvent::port(
                kind,
                name.clone(),
                record.device.clone(),
                format!("Port available: {name}"),
                timestamp,
            ),
            Self::PortDisconnected { name, record } => ConnectionEvent::port(
                kind,
                name.clone(),
                record.device.clone(),
                format!("Port removed: {name}"),
                timestamp,
            ),
            Self::PortChanged {
                name,
                record,
                delta,
            } => ConnectionEvent::port(
                kind,
                name.clone(),
                record.device.clone(),
                format!("Port changed: {name} ({})", fields(delta)),
                timestamp,
            )
            .with_changes(delta.clone()),
        }
    }
}

fn fields(delta: &[AttributeChange]) -> String {
    delta
        .iter()
        .map(|change| change.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compare two snapshots.
///
/// Device changes come before port changes. Within a category, connected and
/// changed entries follow the discovery order of `current`, disconnected
/// entries follow the order of `previous`. Attributes missing on either side
/// count as unchanged.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> Vec<Change> {
    let mut changes = Vec::new();

    for (key, record) in &current.devices {
        match previous.devices.get(key) {
            None => changes.push(Change::DeviceConnected {
                key: key.clone(),
                record: record.clone(),
            }),
            Some(old) => {
                let delta = device_delta(old, record);
                if !delta.is_empty() {
                    changes.push(Change::DeviceChanged {
                        key: key.clone(),
                        record: record.clone(),
                        delta,
                    });
                }
            }
        }
    }

    for (key, record) in &previous.devices {
        if !current.devices.contains_key(key) {
            changes.push(Change::DeviceDisconnected {
                key: key.clone(),
                record: record.clone(),
            });
        }
    }

    for key in &current.collisions {
        if !previous.collisions.contains(key) {
            changes.push(Change::Collision { key: key.clone() });
        }
    }

    for (name, record) in &current.ports {
        match previous.ports.get(name) {
            None => changes.push(Change::PortConnected {
                name: name.clone(),
                record: record.clone(),
            }),
            Some(old) => {
                let delta = port_delta(old, record);
                if !delta.is_empty() {
                    changes.push(Change::PortChanged {
                        name: name.clone(),
                        record: record.clone(),
                        delta,
                    });
                }
            }
        }
    }

    for (name, record) in &previous.ports {
        if !current.ports.contains_key(name) {
            changes.push(Change::PortDisconnected {
                name: name.clone(),
                record: record.clone(),
            });
        }
    }

    changes
}

fn device_delta(old: &DeviceRecord, new: &DeviceRecord) -> Vec<AttributeChange> {
    let mut delta = Vec::new();
    compare(&mut delta, "name", &old.name, &new.name);
    compare(&mut delta, "description", &old.description, &new.description);
    compare(&mut delta, "connected", &old.connected, &new.connected);
    compare(&mut delta, "link_speed", &old.link_speed, &new.link_speed);
    compare(&mut delta, "power_ma", &old.power_ma, &new.power_ma);
    compare(&mut delta, "driver", &old.driver, &new.driver);
    compare(&mut delta, "mount_point", &old.mount_point, &new.mount_point);
    delta
}

fn port_delta(old: &PortRecord, new: &PortRecord) -> Vec<AttributeChange> {
    let mut delta = Vec::new();
    compare(&mut delta, "baud_rate", &old.baud_rate, &new.baud_rate);
    compare(&mut delta, "data_bits", &old.data_bits, &new.data_bits);
    compare(&mut delta, "stop_bits", &old.stop_bits, &new.stop_bits);
    compare(&mut delta, "parity", &old.parity, &new.parity);
    compare(&mut delta, "flow_control", &old.flow_control, &new.flow_control);
    compare(&mut delta, "available", &old.available, &new.available);
    compare(&mut delta, "device", &old.device, &new.device);
    delta
}

fn compare<T>(delta: &mut Vec<AttributeChange>, field: &str, old: &Option<T>, new: &Option<T>)
where
    T: PartialEq + Serialize,
{
    if let (Some(old), Some(new)) = (old, new)
        && old != new
    {
        delta.push(AttributeChange {
            field: field.to_owned(),
            old: serde_json::to_value(old).unwrap_or_default(),
            new: serde_json::to_value(new).unwrap_or_default(),
        });
    }
}
