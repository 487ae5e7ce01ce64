#![forbid(unsafe_code)]

use config::Diagnostics;
use std::io;
use std::path::Path;
use tempfile::tempdir;
use throughput::{Error, Phase, Progress, SpaceProbe, SpeedTester};
use tokio_util::sync::CancellationToken;

const MB: u64 = 1_000_000;

struct FixedSpace(u64);

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

fn small_config() -> Diagnostics {
    Diagnostics {
        chunk_size: 64 * 1024,
        space_margin: 0,
        ..Diagnostics::default()
    }
}

fn leftovers(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[test]
fn measures_and_removes_payload() {
    let dir = tempdir().unwrap();
    let tester = SpeedTester::new(&small_config()).with_probe(Box::new(FixedSpace(u64::MAX)));

    let sample = 300 * 1024 + 17;
    let measurement = tester
        .run(dir.path(), sample, &CancellationToken::new())
        .unwrap();

    assert_eq!(measurement.sample_size, sample);
    assert!(measurement.write_speed > 0.0);
    assert!(measurement.read_speed > 0.0);
    assert_eq!(leftovers(dir.path()), 0);
}

#[test]
fn ten_mb_free_rejects_hundred_mb_sample() {
    let dir = tempdir().unwrap();
    let tester = SpeedTester::new(&small_config()).with_probe(Box::new(FixedSpace(10 * MB)));

    let err = tester
        .run(dir.path(), 100 * MB, &CancellationToken::new())
        .unwrap_err();

    match err {
        Error::InsufficientSpace {
            required,
            available,
            ..
        } => {
            assert_eq!(required, 100 * MB);
            assert_eq!(available, 10 * MB);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(leftovers(dir.path()), 0);
}

#[test]
fn margin_counts_towards_required_space() {
    let dir = tempdir().unwrap();
    let config = Diagnostics {
        space_margin: 1024,
        ..small_config()
    };
    let tester = SpeedTester::new(&config).with_probe(Box::new(FixedSpace(4096)));

    let err = tester
        .run(dir.path(), 4096, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientSpace { required: 5120, .. }));
}

#[test]
fn cancellation_cleans_up() {
    let dir = tempdir().unwrap();
    let tester = SpeedTester::new(&small_config()).with_probe(Box::new(FixedSpace(u64::MAX)));
    let cancel = CancellationToken::new();

    let err = tester
        .run_with_progress(dir.path(), 4 * 1024 * 1024, &cancel, |progress| {
            if progress.done >= 128 * 1024 {
                cancel.cancel();
            }
        })
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(leftovers(dir.path()), 0);
}

#[test]
fn missing_directory_is_device_lost() {
    let dir = tempdir().unwrap();
    let gone = dir.path().join("unplugged");
    let tester = SpeedTester::new(&small_config()).with_probe(Box::new(FixedSpace(u64::MAX)));

    let err = tester
        .run(&gone, 1024, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DeviceLost {
            phase: Phase::Prepare,
            ..
        }
    ));
}

#[test]
fn sample_size_is_bounded() {
    let dir = tempdir().unwrap();
    let config = Diagnostics {
        max_sample_size: 1024,
        ..small_config()
    };
    let tester = SpeedTester::new(&config).with_probe(Box::new(FixedSpace(u64::MAX)));
    let cancel = CancellationToken::new();

    assert!(matches!(
        tester.run(dir.path(), 0, &cancel),
        Err(Error::InvalidSampleSize { .. })
    ));
    assert!(matches!(
        tester.run(dir.path(), 1025, &cancel),
        Err(Error::InvalidSampleSize { max: 1024, .. })
    ));
}

#[test]
fn progress_covers_both_phases() {
    let dir = tempdir().unwrap();
    let tester = SpeedTester::new(&small_config()).with_probe(Box::new(FixedSpace(u64::MAX)));
    let mut seen: Vec<Progress> = Vec::new();

    tester
        .run_with_progress(dir.path(), 200 * 1024, &CancellationToken::new(), |p| {
            seen.push(p)
        })
        .unwrap();

    let last_write = seen.iter().rfind(|p| p.phase == Phase::Write).unwrap();
    let last_read = seen.iter().rfind(|p| p.phase == Phase::Read).unwrap();
    assert_eq!(last_write.done, 200 * 1024);
    assert_eq!(last_read.done, 200 * 1024);
}
