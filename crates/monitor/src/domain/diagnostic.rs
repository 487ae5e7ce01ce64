#![forbid(unsafe_code)]

use super::DeviceKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use throughput::{Assessment, Measurement};

/// Outcome of one throughput diagnostic against a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputResult {
    pub device: DeviceKey,
    pub measurement: Measurement,
    pub assessment: Assessment,
    pub recorded_at: DateTime<Utc>,
}
