#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Monitor {
    /// Time between two polls of the snapshot provider, in milliseconds.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub poll_interval: Duration,

    /// Consecutive failed persist attempts before the loop reports the store
    /// as unavailable.
    pub store_retry_limit: u32,

    /// Upper bound on batches held back while the store is failing.
    pub max_pending_batches: usize,

    pub track_devices: bool,

    pub track_ports: bool,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            store_retry_limit: 5,
            max_pending_batches: 64,
            track_devices: true,
            track_ports: true,
        }
    }
}
