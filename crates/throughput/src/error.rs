#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;

/// Stage of a speed test an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Write,
    Read,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Write => "write",
            Self::Read => "read",
            Self::Cleanup => "cleanup",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target cannot hold the sample. Retry with a smaller one or abort.
    #[error("not enough free space in {path}: {required} bytes needed, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("I/O failure during {phase}: {source}")]
    IoFailure {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },

    /// The device went away while the test was running.
    #[error("device lost during {phase}: {path}")]
    DeviceLost { phase: Phase, path: PathBuf },

    #[error("speed test cancelled")]
    Cancelled,

    #[error("invalid sample size {requested}: must be in 1..={max}")]
    InvalidSampleSize { requested: u64, max: u64 },
}
