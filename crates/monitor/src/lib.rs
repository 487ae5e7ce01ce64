//! USB device and serial port monitoring: snapshot diffing, an append-only
//! event store, the polling loop that ties them together, and on-demand
//! throughput diagnostics.

#![forbid(unsafe_code)]

mod clock;
mod detector;
mod diagnostics;
pub mod domain;
mod engine;
mod error;
pub mod provider;
mod snapshot;
pub mod store;
mod subscriber;

pub use clock::{Clock, SystemClock};
pub use detector::{Change, diff};
pub use diagnostics::DiagnosticService;
pub use engine::{
    ControlEvent, Health, LoopStatus, MonitorEngine, Phase, Services, TickReport,
};
pub use error::Error;
pub use provider::{EnumerationError, SnapshotProvider};
pub use snapshot::Snapshot;
pub use store::{CycleBatch, EventStore, SqliteStore};
pub use subscriber::{ChannelSubscriber, EventSubscriber, FnSubscriber};
