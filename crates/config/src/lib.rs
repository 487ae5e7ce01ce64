#![forbid(unsafe_code)]

mod diagnostics;
mod error;
mod monitor;
mod persistence;
mod serial;

pub use diagnostics::{Diagnostics, Thresholds};
pub use error::Error;
pub use monitor::Monitor;
pub use persistence::Persistence;
pub use serial::{BAUD_RATES, DATA_BITS, FlowControl, Parity, Serial, StopBits};

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration, one field per TOML table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub monitor: Monitor,
    pub diagnostics: Diagnostics,
    pub persistence: Persistence,
    pub serial: Serial,
}

impl Config {
    /// Configuration with every value at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML file layered over the defaults. Keys missing from the file
    /// keep their default value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::InvalidPath(path.to_path_buf()));
        }

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.monitor.poll_interval.is_zero() {
            return Err(Error::Invalid {
                field: "monitor.poll_interval",
                reason: "must be greater than zero".into(),
            });
        }
        if self.diagnostics.chunk_size == 0 {
            return Err(Error::Invalid {
                field: "diagnostics.chunk_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.diagnostics.default_sample_size == 0
            || self.diagnostics.default_sample_size > self.diagnostics.max_sample_size
        {
            return Err(Error::Invalid {
                field: "diagnostics.default_sample_size",
                reason: format!(
                    "must be in 1..={}",
                    self.diagnostics.max_sample_size
                ),
            });
        }
        if !self.diagnostics.thresholds.is_ordered() {
            return Err(Error::Invalid {
                field: "diagnostics.thresholds",
                reason: "expected 0 < poor <= fair <= good <= 1".into(),
            });
        }
        Ok(())
    }
}
