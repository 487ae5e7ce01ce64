#![forbid(unsafe_code)]

use crate::error::{Error, Phase};
use crate::link::MB;
use crate::payload;
use crate::space::{SpaceProbe, default_probe};
use config::Diagnostics;
use humansize::{DECIMAL, format_size};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Bytes written and read back.
    pub sample_size: u64,
    pub write_duration: Duration,
    pub read_duration: Duration,
    /// MB/s.
    pub write_speed: f64,
    /// MB/s.
    pub read_speed: f64,
}

impl Measurement {
    pub fn from_durations(sample_size: u64, write: Duration, read: Duration) -> Self {
        Self {
            sample_size,
            write_duration: write,
            read_duration: read,
            write_speed: mbps(sample_size, write),
            read_speed: mbps(sample_size, read),
        }
    }

    pub fn average_speed(&self) -> f64 {
        (self.write_speed + self.read_speed) / 2.0
    }

    /// The faster direction, which is what the link is judged by.
    pub fn observed_speed(&self) -> f64 {
        self.write_speed.max(self.read_speed)
    }

    pub fn total_duration(&self) -> Duration {
        self.write_duration + self.read_duration
    }
}

fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    // a sub-nanosecond phase still yields a finite (anomalous) speed
    bytes as f64 / MB / elapsed.as_secs_f64().max(1e-9)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    pub done: u64,
    pub total: u64,
}

/// Blocking write/read benchmark against a directory on the target device.
///
/// The payload lives in a [`NamedTempFile`] inside the target directory, so
/// it is removed on every exit path: success, error, cancellation and panic.
pub struct SpeedTester {
    chunk_size: usize,
    space_margin: u64,
    max_sample_size: u64,
    file_prefix: String,
    space: Box<dyn SpaceProbe>,
}

impl SpeedTester {
    pub fn new(config: &Diagnostics) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            space_margin: config.space_margin,
            max_sample_size: config.max_sample_size,
            file_prefix: config.file_prefix.clone(),
            space: default_probe(),
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn SpaceProbe>) -> Self {
        self.space = probe;
        self
    }

    pub fn run(
        &self,
        dir: &Path,
        sample_size: u64,
        cancel: &CancellationToken,
    ) -> Result<Measurement, Error> {
        self.run_with_progress(dir, sample_size, cancel, |_| {})
    }

    pub fn run_with_progress(
        &self,
        dir: &Path,
        sample_size: u64,
        cancel: &CancellationToken,
        mut progress: impl FnMut(Progress),
    ) -> Result<Measurement, Error> {
        if sample_size == 0 || sample_size > self.max_sample_size {
            return Err(Error::InvalidSampleSize {
                requested: sample_size,
                max: self.max_sample_size,
            });
        }
        if !dir.is_dir() {
            return Err(Error::DeviceLost {
                phase: Phase::Prepare,
                path: dir.to_path_buf(),
            });
        }

        let required = sample_size.saturating_add(self.space_margin);
        let available = self
            .space
            .available_bytes(dir)
            .map_err(|err| self.classify(Phase::Prepare, dir, required, err))?;
        if available < required {
            return Err(Error::InsufficientSpace {
                path: dir.to_path_buf(),
                required,
                available,
            });
        }

        info!(
            dir = %dir.display(),
            size = %format_size(sample_size, DECIMAL),
            "starting speed test"
        );

        let mut file = tempfile::Builder::new()
            .prefix(&self.file_prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|err| self.classify(Phase::Prepare, dir, required, err))?;
        debug!(path = %file.path().display(), "test file created");

        let write_duration = self
            .write_phase(&mut file, sample_size, cancel, &mut progress)
            .map_err(|err| self.lift(Phase::Write, dir, required, err))?;

        drop_cache(file.as_file(), sample_size);

        let read_duration = self
            .read_phase(&file, sample_size, cancel, &mut progress)
            .map_err(|err| self.lift(Phase::Read, dir, required, err))?;

        file.close().map_err(|err| {
            warn!(%err, "failed to remove test file");
            self.classify(Phase::Cleanup, dir, required, err)
        })?;

        let measurement = Measurement::from_durations(sample_size, write_duration, read_duration);
        info!(
            write = measurement.write_speed,
            read = measurement.read_speed,
            "speed test finished"
        );
        Ok(measurement)
    }

    fn write_phase(
        &self,
        file: &mut NamedTempFile,
        sample_size: u64,
        cancel: &CancellationToken,
        progress: &mut impl FnMut(Progress),
    ) -> Result<Duration, Interrupted> {
        let base = payload::pattern(self.chunk_size, sample_size);
        let mut chunk = base.clone();
        let mut written = 0u64;
        let mut index = 0u64;

        let start = Instant::now();
        while written < sample_size {
            if cancel.is_cancelled() {
                return Err(Interrupted::Cancelled);
            }
            let len = (sample_size - written).min(self.chunk_size as u64) as usize;
            chunk.copy_from_slice(&base);
            payload::stamp(&mut chunk, index);
            file.write_all(&chunk[..len])?;
            written += len as u64;
            index += 1;
            progress(Progress {
                phase: Phase::Write,
                done: written,
                total: sample_size,
            });
        }
        // the clock keeps running until the data is on the medium
        file.as_file().sync_all()?;
        Ok(start.elapsed())
    }

    fn read_phase(
        &self,
        file: &NamedTempFile,
        sample_size: u64,
        cancel: &CancellationToken,
        progress: &mut impl FnMut(Progress),
    ) -> Result<Duration, Interrupted> {
        let mut reader = file.reopen()?;
        let base = payload::pattern(self.chunk_size, sample_size);
        let mut expected = base.clone();
        let mut buf = vec![0u8; self.chunk_size];
        let mut read = 0u64;
        let mut index = 0u64;

        let start = Instant::now();
        while read < sample_size {
            if cancel.is_cancelled() {
                return Err(Interrupted::Cancelled);
            }
            let len = (sample_size - read).min(self.chunk_size as u64) as usize;
            reader.read_exact(&mut buf[..len])?;
            expected.copy_from_slice(&base);
            payload::stamp(&mut expected, index);
            if buf[..len] != expected[..len] {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("read-back mismatch in chunk {index} (offset {read})"),
                )
                .into());
            }
            read += len as u64;
            index += 1;
            progress(Progress {
                phase: Phase::Read,
                done: read,
                total: sample_size,
            });
        }
        let elapsed = start.elapsed();

        if reader.read(&mut buf[..1])? != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("test file holds more than {sample_size} bytes"),
            )
            .into());
        }
        Ok(elapsed)
    }

    fn lift(&self, phase: Phase, dir: &Path, required: u64, err: Interrupted) -> Error {
        match err {
            Interrupted::Cancelled => {
                info!(%phase, "speed test cancelled");
                Error::Cancelled
            }
            Interrupted::Io(err) => self.classify(phase, dir, required, err),
        }
    }

    fn classify(&self, phase: Phase, dir: &Path, required: u64, err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::StorageFull {
            let available = self.space.available_bytes(dir).unwrap_or(0);
            return Error::InsufficientSpace {
                path: dir.to_path_buf(),
                required,
                available,
            };
        }
        if !dir.exists() || is_device_gone(&err) {
            warn!(%phase, dir = %dir.display(), %err, "device lost during speed test");
            return Error::DeviceLost {
                phase,
                path: dir.to_path_buf(),
            };
        }
        Error::IoFailure { phase, source: err }
    }
}

impl std::fmt::Debug for SpeedTester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedTester")
            .field("chunk_size", &self.chunk_size)
            .field("space_margin", &self.space_margin)
            .field("max_sample_size", &self.max_sample_size)
            .field("file_prefix", &self.file_prefix)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Interrupted {
    Cancelled,
    Io(io::Error),
}

impl From<io::Error> for Interrupted {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(unix)]
fn is_device_gone(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENODEV | libc::ENXIO))
}

#[cfg(not(unix))]
fn is_device_gone(_err: &io::Error) -> bool {
    false
}

/// Evict the test file from the page cache so the read phase hits the device.
#[cfg(target_os = "linux")]
fn drop_cache(file: &File, len: u64) {
    use nix::fcntl::PosixFadviseAdvice;
    use std::os::fd::AsRawFd;

    if let Err(err) = nix::fcntl::posix_fadvise(
        file.as_raw_fd(),
        0,
        len as libc::off_t,
        PosixFadviseAdvice::POSIX_FADV_DONTNEED,
    ) {
        debug!(%err, "could not drop cached pages of the test file");
    }
}

#[cfg(not(target_os = "linux"))]
fn drop_cache(_file: &File, _len: u64) {}
