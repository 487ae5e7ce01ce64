#![forbid(unsafe_code)]

use crate::domain::{DeviceKey, DeviceRecord, PortName, PortRecord};
use indexmap::IndexMap;
use std::path::Path;

/// Point-in-time enumeration of attached devices and available ports, keyed
/// by identity in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub devices: IndexMap<DeviceKey, DeviceRecord>,
    pub ports: IndexMap<PortName, PortRecord>,
    /// Keys reported by more than one record in this snapshot. Each key is
    /// listed once, in the order the collision was found.
    pub collisions: Vec<DeviceKey>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from provider output. When two records share a key
    /// the first one is kept and the key is flagged as a collision.
    pub fn from_records(
        devices: impl IntoIterator<Item = DeviceRecord>,
        ports: impl IntoIterator<Item = PortRecord>,
    ) -> Self {
        let mut snapshot = Self::default();

        for record in devices {
            let key = record.key();
            if snapshot.devices.contains_key(&key) {
                if !snapshot.collisions.contains(&key) {
                    snapshot.collisions.push(key);
                }
                continue;
            }
            snapshot.devices.insert(key, record);
        }

        for record in ports {
            // Port names are unique at any instant; a repeated name is the
            // same endpoint reported twice.
            snapshot.ports.entry(record.name.clone()).or_insert(record);
        }

        snapshot
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.ports.is_empty()
    }

    pub fn device(&self, key: &DeviceKey) -> Option<&DeviceRecord> {
        self.devices.get(key)
    }

    pub fn mount_point(&self, key: &DeviceKey) -> Option<&Path> {
        self.devices.get(key)?.mount_point.as_deref()
    }

    pub fn ports_of<'a>(&'a self, key: &'a DeviceKey) -> impl Iterator<Item = &'a PortRecord> + 'a {
        self.ports
            .values()
            .filter(move |port| port.device.as_ref() == Some(key))
    }
}
