use super::{open_store, services};
use crate::signals::{SignalEvent, wait_for_signal};
use config::Config;
use monitor::domain::{DeviceKey, EventBatch, PortName};
use monitor::{ControlEvent, FnSubscriber, MonitorEngine};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(super) async fn run(
    config: Config,
    conffile: Option<&Path>,
    database: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let mut engine = MonitorEngine::load(config, services(store.clone())).await?;
    engine.subscribe(Box::new(FnSubscriber(log_batch)));
    let status = engine.status();

    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let mut engine_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run_until(cancel, control_rx).await })
    };

    let (events_tx, events_rx) = flume::bounded(8);
    let signals = tokio::spawn(async move { wait_for_signal(&events_tx).await });
    info!("monitoring started");

    let finished = loop {
        tokio::select! {
            res = &mut engine_task => break Some(res),
            res = events_rx.recv_async() => {
                // The listener only stops on failure.
                let Ok(event) = res else { break None };
                debug!(?event, "Received signal event");
                match event {
                    SignalEvent::Rescan => {
                        if control_tx.send(ControlEvent::Rescan).is_err() {
                            break None;
                        }
                    }
                    SignalEvent::DumpStatus => {
                        let status = status.borrow().clone();
                        info!(
                            phase = ?status.phase,
                            health = ?status.health,
                            last_cycle = status.last_cycle,
                            pending = status.pending_batches,
                            devices = status.devices,
                            ports = status.ports,
                            "loop status"
                        );
                    }
                    SignalEvent::Reload => match reload(conffile, database) {
                        Some(config) => {
                            if control_tx.send(ControlEvent::Reload(Box::new(config))).is_err() {
                                break None;
                            }
                        }
                        None => continue,
                    },
                    SignalEvent::Shutdown => break None,
                }
            }
        }
    };

    cancel.cancel();
    signals.abort();
    if let Ok(Err(err)) = signals.await {
        error!(%err, "signal listener failed");
    }
    let outcome = match finished {
        Some(res) => res,
        None => engine_task.await,
    };
    store.close().await;
    outcome??;
    info!("monitoring stopped");
    Ok(())
}

/// Re-read the configuration file, keeping the command-line database
/// override. `None` leaves the running configuration untouched.
fn reload(conffile: Option<&Path>, database: Option<&Path>) -> Option<Config> {
    let Some(path) = conffile else {
        warn!("reload requested but no configuration file was given");
        return None;
    };
    match Config::load(path) {
        Ok(mut config) => {
            if let Some(database) = database {
                config.persistence.database_path = Some(database.to_path_buf());
            }
            info!(path = %path.display(), "configuration reloaded");
            Some(config)
        }
        Err(err) => {
            error!(%err, path = %path.display(), "reload failed; keeping current configuration");
            None
        }
    }
}

fn log_batch(batch: &EventBatch) {
    for event in &batch.events {
        info!(
            cycle = batch.cycle_id,
            kind = %event.kind,
            device = event.device.as_ref().map(DeviceKey::as_str),
            port = event.port.as_ref().map(PortName::as_str),
            changes = event.changes.len(),
            "{}",
            event.description
        );
    }
}
