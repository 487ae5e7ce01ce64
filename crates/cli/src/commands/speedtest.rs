use super::{flush, open_store, or_dash, services};
use crate::cli::SpeedtestArgs;
use config::Config;
use humansize::{DECIMAL, format_size};
use monitor::domain::{DeviceKey, ThroughputResult};
use monitor::{DiagnosticService, EventStore, MonitorEngine, Snapshot};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use throughput::{Anomaly, Assessment, Measurement, Phase};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(super) async fn run(
    out: &mut impl Write,
    config: Config,
    args: &SpeedtestArgs,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cleaning up");
                cancel.cancel();
            }
        })
    };

    let outcome = match (&args.device, &args.path) {
        (Some(key), _) => {
            let key = DeviceKey::from_raw(key.as_str());
            device(out, config, &key, args.size, &cancel).await
        }
        (None, Some(path)) => directory(out, &config, path, args.size, &cancel).await,
        (None, None) => Ok(()),
    };
    interrupt.abort();
    outcome?;
    flush(out)?;
    Ok(())
}

async fn directory(
    out: &mut impl Write,
    config: &Config,
    path: &Path,
    sample_size: Option<u64>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let (_, snapshots) = watch::channel(Arc::new(Snapshot::new()));
    let service = DiagnosticService::new(config, snapshots);
    let measurement = service.run_on_path(path, sample_size, cancel).await?;
    render_measurement(out, &measurement)?;
    Ok(())
}

/// Enumerate once so the device is known and stored, then test it and store
/// the result.
async fn device(
    out: &mut impl Write,
    config: Config,
    key: &DeviceKey,
    sample_size: Option<u64>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let mut engine = MonitorEngine::load(config.clone(), services(store.clone())).await?;
    engine.tick().await?;

    let service = DiagnosticService::new(&config, engine.snapshots());
    let result = test_attached(&mut engine, &service, key, sample_size, cancel).await?;
    store.record_throughput(&result).await?;
    store.close().await;

    render_measurement(out, &result.measurement)?;
    render_assessment(out, &result.assessment)?;
    Ok(())
}

/// Nothing polls while a one-shot test runs, so enumerate again afterwards
/// and reject the result if the device left or moved in the meantime.
async fn test_attached(
    engine: &mut MonitorEngine,
    service: &DiagnosticService,
    key: &DeviceKey,
    sample_size: Option<u64>,
    cancel: &CancellationToken,
) -> Result<ThroughputResult, monitor::Error> {
    let mount = mount_point(engine, key);
    let result = service.run_throughput_test(key, sample_size, cancel).await?;
    engine.tick().await?;
    match (mount, mount_point(engine, key)) {
        (Some(before), Some(after)) if before == after => Ok(result),
        (before, _) => {
            warn!(device = %key, "device removed during throughput test");
            Err(monitor::Error::Diagnostic(throughput::Error::DeviceLost {
                phase: Phase::Read,
                path: before.unwrap_or_default(),
            }))
        }
    }
}

fn mount_point(engine: &MonitorEngine, key: &DeviceKey) -> Option<PathBuf> {
    engine.snapshots().borrow().mount_point(key).map(Path::to_path_buf)
}

fn render_measurement(out: &mut impl Write, measurement: &Measurement) -> std::io::Result<()> {
    writeln!(out, "sample:  {}", format_size(measurement.sample_size, DECIMAL))?;
    writeln!(
        out,
        "write:   {:.2} MB/s in {:.3}s",
        measurement.write_speed,
        measurement.write_duration.as_secs_f64()
    )?;
    writeln!(
        out,
        "read:    {:.2} MB/s in {:.3}s",
        measurement.read_speed,
        measurement.read_duration.as_secs_f64()
    )?;
    writeln!(out, "average: {:.2} MB/s", measurement.average_speed())
}

fn render_assessment(out: &mut impl Write, assessment: &Assessment) -> std::io::Result<()> {
    writeln!(out, "link:    {}", or_dash(assessment.link))?;
    writeln!(
        out,
        "ceiling: {}",
        or_dash(assessment.theoretical.map(|mbps| format!("{mbps:.0} MB/s")))
    )?;
    writeln!(
        out,
        "usage:   {}",
        or_dash(assessment.efficiency.map(|ratio| format!("{:.1}%", ratio * 100.0)))
    )?;
    writeln!(out, "rating:  {}", or_dash(assessment.rating))?;
    writeln!(out, "class:   {:?}", assessment.speed_class)?;
    if let Some(Anomaly::ExceedsTheoretical {
        observed,
        theoretical,
    }) = assessment.anomaly
    {
        writeln!(
            out,
            "warning: {observed:.2} MB/s exceeds the {theoretical:.0} MB/s link ceiling; the reported link speed is likely wrong"
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor::domain::DeviceRecord;
    use monitor::provider::{ScriptStep, ScriptedProvider};
    use monitor::{Services, SqliteStore, SystemClock};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::tempdir;
    use throughput::SpeedClass;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.diagnostics.chunk_size = 64 * 1024;
        config.diagnostics.space_margin = 0;
        config
    }

    async fn engine_over(provider: ScriptedProvider) -> MonitorEngine {
        let services = Services {
            provider: Arc::new(provider),
            store: Arc::new(SqliteStore::in_memory().await.unwrap()),
            clock: Box::new(SystemClock),
        };
        let mut engine = MonitorEngine::new(small_config(), services).await.unwrap();
        engine.tick().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn attached_device_keeps_its_result() {
        let dir = tempdir().unwrap();
        let stick = DeviceRecord::new(0x0781, 0x5581).with_mount_point(dir.path());
        let key = stick.key();
        let mut engine = engine_over(ScriptedProvider::new([ScriptStep::devices([stick])])).await;
        let service = DiagnosticService::new(&small_config(), engine.snapshots());

        let result = test_attached(
            &mut engine,
            &service,
            &key,
            Some(256 * 1024),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.device, key);
        assert_eq!(result.measurement.sample_size, 256 * 1024);
    }

    #[tokio::test]
    async fn device_gone_after_run_is_lost() {
        let dir = tempdir().unwrap();
        let stick = DeviceRecord::new(0x0781, 0x5581).with_mount_point(dir.path());
        let key = stick.key();
        let mut engine = engine_over(ScriptedProvider::new([
            ScriptStep::devices([stick]),
            ScriptStep::devices([]),
        ]))
        .await;
        let service = DiagnosticService::new(&small_config(), engine.snapshots());

        let err = test_attached(
            &mut engine,
            &service,
            &key,
            Some(256 * 1024),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            monitor::Error::Diagnostic(throughput::Error::DeviceLost { .. })
        ));
    }

    #[test]
    fn measurement_lines() {
        let measurement =
            Measurement::from_durations(10_000_000, Duration::from_secs(1), Duration::from_millis(500));

        let mut out = Vec::new();
        render_measurement(&mut out, &measurement).unwrap();

        let text = String::from_utf8(out).unwrap();
        let (sample, rest) = text.split_once('\n').unwrap();
        assert!(sample.starts_with("sample:  10"));
        assert_eq!(
            rest,
            "write:   10.00 MB/s in 1.000s\n\
             read:    20.00 MB/s in 0.500s\n\
             average: 15.00 MB/s\n"
        );
    }

    #[test]
    fn unknown_link_renders_dashes() {
        let assessment = Assessment {
            link: None,
            theoretical: None,
            efficiency: None,
            rating: None,
            speed_class: SpeedClass::Moderate,
            anomaly: None,
        };

        let mut out = Vec::new();
        render_assessment(&mut out, &assessment).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("link:    -\n"));
        assert!(text.contains("rating:  -\n"));
        assert!(text.contains("class:   Moderate\n"));
        assert!(!text.contains("warning"));
    }
}
