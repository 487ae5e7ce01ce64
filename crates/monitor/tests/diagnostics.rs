#![forbid(unsafe_code)]

use config::Config;
use monitor::domain::{DeviceKey, DeviceRecord};
use monitor::{ControlEvent, DiagnosticService, Error, Snapshot};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use throughput::{LinkSpeed, SpaceProbe, SpeedTester};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

const MB: u64 = 1_000_000;

struct FixedSpace(u64);

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Blocks the run until the test releases it.
struct GatedSpace(Mutex<std_mpsc::Receiver<()>>);

impl SpaceProbe for GatedSpace {
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        let _ = self.0.lock().unwrap().recv();
        Ok(u64::MAX)
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.diagnostics.chunk_size = 64 * 1024;
    config.diagnostics.space_margin = 0;
    config.diagnostics.default_sample_size = 512 * 1024;
    config
}

fn stick(mount: &Path) -> DeviceRecord {
    DeviceRecord::new(0x0781, 0x5581)
        .with_serial("4C53")
        .with_link_speed(LinkSpeed::Super)
        .with_mount_point(mount)
}

fn attached(records: impl IntoIterator<Item = DeviceRecord>) -> watch::Sender<Arc<Snapshot>> {
    let (tx, _) = watch::channel(Arc::new(Snapshot::from_records(records, [])));
    tx
}

fn leftovers(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

#[tokio::test]
async fn measures_rates_and_hands_result_to_loop() {
    let dir = tempdir().unwrap();
    let record = stick(dir.path());
    let key = record.key();
    let snapshots = attached([record]);
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let config = config();
    let service = DiagnosticService::new(&config, snapshots.subscribe())
        .with_tester(
            SpeedTester::new(&config.diagnostics).with_probe(Box::new(FixedSpace(u64::MAX))),
        )
        .with_recorder(control_tx);

    let result = service
        .run_throughput_test(&key, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.device, key);
    assert_eq!(result.measurement.sample_size, 512 * 1024);
    assert_eq!(result.assessment.link, Some(LinkSpeed::Super));
    let efficiency = result.assessment.efficiency.unwrap();
    assert!((0.0..=1.0).contains(&efficiency));
    assert!(result.assessment.rating.is_some());
    assert_eq!(leftovers(&dir), 0);
    assert!(!service.is_running(&key));

    match control_rx.try_recv().unwrap() {
        ControlEvent::RecordThroughput(recorded) => assert_eq!(*recorded, result),
        _ => panic!("expected a throughput record"),
    }
}

#[tokio::test]
async fn unknown_device_is_rejected() {
    let snapshots = attached([]);
    let service = DiagnosticService::new(&config(), snapshots.subscribe());

    let err = service
        .run_throughput_test(&DeviceKey::new(1, 1, None), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownDevice(_)));
}

#[tokio::test]
async fn device_without_filesystem_is_rejected() {
    let record = DeviceRecord::new(0x046d, 0xc52b);
    let key = record.key();
    let snapshots = attached([record]);
    let service = DiagnosticService::new(&config(), snapshots.subscribe());

    let err = service
        .run_throughput_test(&key, None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotStorage(_)));
}

#[tokio::test]
async fn insufficient_space_leaves_nothing_behind() {
    let dir = tempdir().unwrap();
    let record = stick(dir.path());
    let key = record.key();
    let snapshots = attached([record]);
    let config = config();
    let service = DiagnosticService::new(&config, snapshots.subscribe()).with_tester(
        SpeedTester::new(&config.diagnostics).with_probe(Box::new(FixedSpace(10 * MB))),
    );

    let err = service
        .run_throughput_test(&key, Some(100 * MB), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Diagnostic(throughput::Error::InsufficientSpace { .. })
    ));
    assert_eq!(leftovers(&dir), 0);
    assert!(!service.is_running(&key));
}

#[tokio::test]
async fn one_run_per_device() {
    let dir = tempdir().unwrap();
    let record = stick(dir.path());
    let key = record.key();
    let snapshots = attached([record]);
    let (release, gate) = std_mpsc::channel();
    let config = config();
    let service = DiagnosticService::new(&config, snapshots.subscribe()).with_tester(
        SpeedTester::new(&config.diagnostics).with_probe(Box::new(GatedSpace(Mutex::new(gate)))),
    );

    let first = {
        let service = service.clone();
        let key = key.clone();
        tokio::spawn(async move {
            service
                .run_throughput_test(&key, None, &CancellationToken::new())
                .await
        })
    };
    while !service.is_running(&key) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = service
        .run_throughput_test(&key, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DiagnosticBusy(_)));

    release.send(()).unwrap();
    first.await.unwrap().unwrap();
    assert!(!service.is_running(&key));
}

#[tokio::test]
async fn removal_during_run_is_device_lost() {
    let dir = tempdir().unwrap();
    let record = stick(dir.path());
    let key = record.key();
    let snapshots = attached([record]);
    let (release, gate) = std_mpsc::channel();
    let config = config();
    let service = DiagnosticService::new(&config, snapshots.subscribe()).with_tester(
        SpeedTester::new(&config.diagnostics).with_probe(Box::new(GatedSpace(Mutex::new(gate)))),
    );

    let run = {
        let service = service.clone();
        let key = key.clone();
        tokio::spawn(async move {
            service
                .run_throughput_test(&key, None, &CancellationToken::new())
                .await
        })
    };
    while !service.is_running(&key) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    snapshots.send_replace(Arc::new(Snapshot::new()));
    release.send(()).unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::Diagnostic(throughput::Error::DeviceLost { .. })
    ));
    assert_eq!(leftovers(&dir), 0);
}

#[tokio::test]
async fn raw_directory_run() {
    let dir = tempdir().unwrap();
    let snapshots = attached([]);
    let config = config();
    let service = DiagnosticService::new(&config, snapshots.subscribe()).with_tester(
        SpeedTester::new(&config.diagnostics).with_probe(Box::new(FixedSpace(u64::MAX))),
    );

    let measurement = service
        .run_on_path(dir.path(), Some(256 * 1024), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(measurement.sample_size, 256 * 1024);
    assert_eq!(leftovers(&dir), 0);
}

#[tokio::test]
async fn abandoned_run_holds_device_until_worker_returns() {
    let dir = tempdir().unwrap();
    let record = stick(dir.path());
    let key = record.key();
    let snapshots = attached([record]);
    let (release, gate) = std_mpsc::channel();
    let config = config();
    let service = DiagnosticService::new(&config, snapshots.subscribe()).with_tester(
        SpeedTester::new(&config.diagnostics).with_probe(Box::new(GatedSpace(Mutex::new(gate)))),
    );

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        service.run_throughput_test(&key, None, &CancellationToken::new()),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(service.is_running(&key));

    let err = service
        .run_throughput_test(&key, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DiagnosticBusy(_)));

    release.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while service.is_running(&key) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    // the worker saw the cancellation and removed its file
    assert_eq!(leftovers(&dir), 0);
}

#[tokio::test]
async fn reloaded_settings_apply_to_next_run() {
    let dir = tempdir().unwrap();
    let snapshots = attached([]);
    let config = config();
    let (updates, rx) = watch::channel(config.diagnostics.clone());
    let service = DiagnosticService::new(&config, snapshots.subscribe()).with_updates(rx);

    let mut reloaded = config.diagnostics.clone();
    reloaded.default_sample_size = 128 * 1024;
    updates.send_replace(reloaded);

    let measurement = service
        .run_on_path(dir.path(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(measurement.sample_size, 128 * 1024);
}
