#![forbid(unsafe_code)]

mod codec;
mod report;
mod sqlite;

pub use report::{DeviceStatistics, Export, PortStatistics, Statistics};
pub use sqlite::SqliteStore;

use crate::domain::{
    ConnectionEvent, ConnectionState, Device, DeviceKey, DeviceRecord, LineSettings, LoggedEvent,
    Port, PortName, PortRecord, ThroughputResult,
};
use crate::error::Error;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Device projection update for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpsert {
    pub record: DeviceRecord,
    pub state: ConnectionState,
    /// Set when the device was observed this cycle; bumps `last_seen`.
    pub seen: Option<DateTime<Utc>>,
}

/// Port projection update for one cycle. `line` is used only when the
/// appearance is first recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct PortUpsert {
    pub record: PortRecord,
    pub line: LineSettings,
}

/// Everything one monitoring cycle writes, applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleBatch {
    pub cycle_id: u64,
    pub observed_at: DateTime<Utc>,
    pub devices: Vec<DeviceUpsert>,
    pub ports: Vec<PortUpsert>,
    pub departed_ports: Vec<PortName>,
    pub events: Vec<ConnectionEvent>,
}

impl CycleBatch {
    pub fn new(cycle_id: u64, observed_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            observed_at,
            devices: Vec::new(),
            ports: Vec::new(),
            departed_ports: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Owner of every persisted row. Writes go through [`EventStore::persist`]
/// and [`EventStore::record_throughput`]; everything else is read-only.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Apply a cycle's projections and append its events. Replaying a batch
    /// with the same cycle id does not duplicate log rows.
    async fn persist(&self, batch: &CycleBatch) -> Result<(), Error>;

    async fn record_throughput(&self, result: &ThroughputResult) -> Result<(), Error>;

    /// Devices last known connected and ports last known available.
    async fn connected_snapshot(&self) -> Result<Snapshot, Error>;

    /// Highest cycle id with logged events.
    async fn last_cycle_id(&self) -> Result<Option<u64>, Error>;

    async fn device(&self, key: &DeviceKey) -> Result<Option<Device>, Error>;

    async fn devices(&self) -> Result<Vec<Device>, Error>;

    /// Every port row, including closed appearances, oldest first.
    async fn ports(&self) -> Result<Vec<Port>, Error>;

    async fn port_history(&self, name: &PortName) -> Result<Vec<Port>, Error>;

    async fn events_for_device(&self, key: &DeviceKey) -> Result<Vec<LoggedEvent>, Error>;

    async fn events_for_port(&self, name: &PortName) -> Result<Vec<LoggedEvent>, Error>;

    /// Events with `from <= timestamp <= to`, in log order.
    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LoggedEvent>, Error>;

    async fn throughput_results(&self, key: &DeviceKey) -> Result<Vec<ThroughputResult>, Error>;

    async fn all_throughput_results(&self) -> Result<Vec<ThroughputResult>, Error>;

    async fn export(&self) -> Result<Export, Error> {
        let events = self
            .events_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
            .await?;
        Ok(Export {
            exported_at: Utc::now(),
            devices: self.devices().await?,
            ports: self.ports().await?,
            events,
            throughput: self.all_throughput_results().await?,
        })
    }

    async fn statistics(&self) -> Result<Statistics, Error> {
        let devices = self.devices().await?;
        let ports = self.ports().await?;
        Ok(Statistics::collect(&devices, &ports))
    }
}
