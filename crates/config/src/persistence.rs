#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Persistence {
    /// Optional path to the history database. Without one, history lives in
    /// memory for the lifetime of the process.
    pub database_path: Option<PathBuf>,

    /// Indent JSON exports.
    pub export_pretty: bool,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            database_path: None,
            export_pretty: true,
        }
    }
}
