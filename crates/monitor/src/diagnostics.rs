#![forbid(unsafe_code)]

use crate::domain::{DeviceKey, DeviceRecord, ThroughputResult};
use crate::engine::ControlEvent;
use crate::error::Error;
use crate::snapshot::Snapshot;
use chrono::Utc;
use config::{Config, Diagnostics};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use throughput::{Measurement, Phase, SpeedTester, assess, effective_link};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// On-demand throughput tests against tracked storage devices.
///
/// Runs happen on the blocking pool, at most one per device. Results are
/// handed to the monitoring loop, which is the only writer to the store.
#[derive(Clone)]
pub struct DiagnosticService {
    settings: Arc<Mutex<Settings>>,
    updates: Option<watch::Receiver<Diagnostics>>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    recorder: Option<mpsc::UnboundedSender<ControlEvent>>,
    active: Arc<Mutex<HashSet<DeviceKey>>>,
}

struct Settings {
    diagnostics: Diagnostics,
    tester: Arc<SpeedTester>,
}

/// Marks a device busy until dropped. Owned by the blocking worker, so the
/// device stays busy for as long as the test touches it.
struct Slot {
    active: Arc<Mutex<HashSet<DeviceKey>>>,
    key: DeviceKey,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}

impl DiagnosticService {
    pub fn new(config: &Config, snapshots: watch::Receiver<Arc<Snapshot>>) -> Self {
        Self {
            settings: Arc::new(Mutex::new(Settings {
                diagnostics: config.diagnostics.clone(),
                tester: Arc::new(SpeedTester::new(&config.diagnostics)),
            })),
            updates: None,
            snapshots,
            recorder: None,
            active: Arc::default(),
        }
    }

    /// Send results to a running loop for persistence.
    pub fn with_recorder(mut self, recorder: mpsc::UnboundedSender<ControlEvent>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Pick up reloaded settings, e.g. from [`MonitorEngine::diagnostics`].
    /// A change replaces the tester, including one set with `with_tester`.
    ///
    /// [`MonitorEngine::diagnostics`]: crate::MonitorEngine::diagnostics
    pub fn with_updates(mut self, updates: watch::Receiver<Diagnostics>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn with_tester(self, tester: SpeedTester) -> Self {
        self.settings.lock().tester = Arc::new(tester);
        self
    }

    pub fn is_running(&self, key: &DeviceKey) -> bool {
        self.active.lock().contains(key)
    }

    /// Measure a tracked device through its mounted filesystem and rate the
    /// result against the device's link. `sample_size` defaults to the
    /// configured size.
    pub async fn run_throughput_test(
        &self,
        key: &DeviceKey,
        sample_size: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<ThroughputResult, Error> {
        let record = self
            .current(key)
            .ok_or_else(|| Error::UnknownDevice(key.clone()))?;
        let mount = record
            .mount_point
            .clone()
            .ok_or_else(|| Error::NotStorage(key.clone()))?;
        let slot = self.acquire(key)?;

        let (tester, diagnostics) = self.current_settings();
        let sample_size = sample_size.unwrap_or(diagnostics.default_sample_size);
        info!(device = %key, mount = %mount.display(), sample_size, "throughput test requested");

        let outcome = self
            .measure(tester, mount.clone(), sample_size, cancel, Some(slot))
            .await?;

        // A device that vanished while the test ran invalidates whatever the
        // test returned.
        if !self.still_mounted(key, &mount) {
            warn!(device = %key, "device removed during throughput test");
            return Err(Error::Diagnostic(throughput::Error::DeviceLost {
                phase: Phase::Read,
                path: mount,
            }));
        }
        let measurement = outcome?;

        let link = effective_link(record.link_speed, record.usb_version);
        let result = ThroughputResult {
            device: key.clone(),
            assessment: assess(&measurement, link, &diagnostics.thresholds.clamp()),
            measurement,
            recorded_at: Utc::now(),
        };
        info!(
            device = %key,
            write = result.measurement.write_speed,
            read = result.measurement.read_speed,
            efficiency = ?result.assessment.efficiency,
            rating = ?result.assessment.rating,
            "throughput test finished"
        );

        if let Some(recorder) = &self.recorder
            && recorder
                .send(ControlEvent::RecordThroughput(Box::new(result.clone())))
                .is_err()
        {
            warn!(device = %key, "monitoring loop gone; result not persisted");
        }
        Ok(result)
    }

    /// Measure an arbitrary directory. Nothing is rated or persisted.
    pub async fn run_on_path(
        &self,
        dir: impl AsRef<Path>,
        sample_size: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Measurement, Error> {
        let (tester, diagnostics) = self.current_settings();
        let sample_size = sample_size.unwrap_or(diagnostics.default_sample_size);
        Ok(self
            .measure(tester, dir.as_ref().to_path_buf(), sample_size, cancel, None)
            .await??)
    }

    /// Dropping the returned future cancels the worker, but `slot` is only
    /// released once the worker has actually returned.
    async fn measure(
        &self,
        tester: Arc<SpeedTester>,
        dir: PathBuf,
        sample_size: u64,
        cancel: &CancellationToken,
        slot: Option<Slot>,
    ) -> Result<Result<Measurement, throughput::Error>, Error> {
        let run = cancel.child_token();
        let _cancel_on_drop = run.clone().drop_guard();
        let outcome = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            tester.run(&dir, sample_size, &run)
        })
        .await?;
        Ok(outcome)
    }

    fn current_settings(&self) -> (Arc<SpeedTester>, Diagnostics) {
        let mut settings = self.settings.lock();
        if let Some(updates) = &self.updates {
            let latest = updates.borrow();
            if *latest != settings.diagnostics {
                info!("diagnostic settings reloaded");
                settings.tester = Arc::new(SpeedTester::new(&latest));
                settings.diagnostics = latest.clone();
            }
        }
        (Arc::clone(&settings.tester), settings.diagnostics.clone())
    }

    fn current(&self, key: &DeviceKey) -> Option<DeviceRecord> {
        self.snapshots.borrow().device(key).cloned()
    }

    fn still_mounted(&self, key: &DeviceKey, mount: &Path) -> bool {
        self.snapshots.borrow().mount_point(key) == Some(mount)
    }

    fn acquire(&self, key: &DeviceKey) -> Result<Slot, Error> {
        if !self.active.lock().insert(key.clone()) {
            return Err(Error::DiagnosticBusy(key.clone()));
        }
        Ok(Slot {
            active: Arc::clone(&self.active),
            key: key.clone(),
        })
    }
}
