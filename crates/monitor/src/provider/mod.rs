#![forbid(unsafe_code)]

mod scripted;
#[cfg(target_os = "linux")]
mod sysfs;

pub use scripted::{ScriptStep, ScriptedProvider};
#[cfg(target_os = "linux")]
pub use sysfs::SysfsProvider;

use crate::domain::{DeviceRecord, PortRecord};
use crate::snapshot::Snapshot;
use std::path::PathBuf;
use std::sync::Arc;

/// Enumeration of attached hardware failed. The loop treats this as
/// transient and tries again next cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnumerationError {
    #[error("failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("mount table unavailable: {0}")]
    Mounts(String),

    #[error("device enumeration is not supported on {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Scripted(String),
}

impl EnumerationError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Platform capability that reports what is attached right now.
pub trait SnapshotProvider: Send + Sync {
    fn list_devices(&self) -> Result<Vec<DeviceRecord>, EnumerationError>;

    fn list_ports(&self) -> Result<Vec<PortRecord>, EnumerationError>;

    /// Both lists as one snapshot.
    fn snapshot(&self) -> Result<Snapshot, EnumerationError> {
        let devices = self.list_devices()?;
        let ports = self.list_ports()?;
        Ok(Snapshot::from_records(devices, ports))
    }
}

/// Provider for platforms without an enumeration backend. Every call fails,
/// which keeps the loop alive in its retry state.
#[derive(Debug, Default)]
pub struct UnsupportedProvider;

impl SnapshotProvider for UnsupportedProvider {
    fn list_devices(&self) -> Result<Vec<DeviceRecord>, EnumerationError> {
        Err(EnumerationError::Unsupported(std::env::consts::OS))
    }

    fn list_ports(&self) -> Result<Vec<PortRecord>, EnumerationError> {
        Err(EnumerationError::Unsupported(std::env::consts::OS))
    }
}

/// The provider for the platform this binary was built for.
pub fn platform_provider() -> Arc<dyn SnapshotProvider> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(SysfsProvider::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedProvider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_always_fails() {
        let provider = UnsupportedProvider;
        assert!(matches!(
            provider.snapshot(),
            Err(EnumerationError::Unsupported(_))
        ));
    }
}
