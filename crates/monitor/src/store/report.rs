#![forbid(unsafe_code)]

use crate::domain::{Device, LoggedEvent, Port, PortKind, PortName, ThroughputResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Interchange document with everything the store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub exported_at: DateTime<Utc>,
    pub devices: Vec<Device>,
    pub ports: Vec<Port>,
    pub events: Vec<LoggedEvent>,
    pub throughput: Vec<ThroughputResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub devices: DeviceStatistics,
    pub ports: PortStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatistics {
    pub total: u64,
    pub connected: u64,
    pub disconnected: u64,
    pub by_class: BTreeMap<String, u64>,
    pub by_manufacturer: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortStatistics {
    pub total: u64,
    pub available: u64,
    pub unavailable: u64,
    pub by_kind: BTreeMap<PortKind, u64>,
}

impl Statistics {
    /// Counts over the device projections and the newest row of every port
    /// name.
    pub fn collect(devices: &[Device], ports: &[Port]) -> Self {
        let mut stats = Self::default();

        for device in devices {
            stats.devices.total += 1;
            if device.is_connected() {
                stats.devices.connected += 1;
            } else {
                stats.devices.disconnected += 1;
            }
            let class = device.class.clone().unwrap_or_else(|| "Unknown".into());
            *stats.devices.by_class.entry(class).or_default() += 1;
            let manufacturer = device
                .manufacturer
                .clone()
                .unwrap_or_else(|| "Unknown".into());
            *stats.devices.by_manufacturer.entry(manufacturer).or_default() += 1;
        }

        let mut latest: HashMap<&PortName, &Port> = HashMap::new();
        for port in ports {
            latest
                .entry(&port.name)
                .and_modify(|current| {
                    if port.id > current.id {
                        *current = port;
                    }
                })
                .or_insert(port);
        }

        for port in latest.values() {
            stats.ports.total += 1;
            if port.available && port.removed_at.is_none() {
                stats.ports.available += 1;
            } else {
                stats.ports.unavailable += 1;
            }
            *stats.ports.by_kind.entry(port.kind()).or_default() += 1;
        }

        stats
    }
}
