#![forbid(unsafe_code)]

use crate::domain::DeviceKey;
use crate::provider::EnumerationError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::Error),

    #[error("enumeration failed: {0}")]
    Enumeration(#[from] EnumerationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("failed to persist cycle {cycle}: {source}")]
    StoreWrite {
        cycle: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("cycle {cycle} still unpersisted after {attempts} attempts")]
    StoreRetriesExhausted { cycle: u64, attempts: u32 },

    #[error("diagnostic failed: {0}")]
    Diagnostic(#[from] throughput::Error),

    #[error("a diagnostic is already running on {0}")]
    DiagnosticBusy(DeviceKey),

    #[error("unknown device: {0}")]
    UnknownDevice(DeviceKey),

    #[error("device {0} has no mounted filesystem")]
    NotStorage(DeviceKey),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("monitoring loop is no longer running")]
    LoopClosed,
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Sqlx(sqlx::Error::from(err))
    }
}

impl Error {
    pub(crate) fn corrupt(table: &'static str, reason: impl ToString) -> Self {
        Self::CorruptRow {
            table,
            reason: reason.to_string(),
        }
    }
}
