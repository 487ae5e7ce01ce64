#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::detector::{Change, diff};
use crate::domain::{ConnectionEvent, ConnectionState, EventBatch, ThroughputResult};
use crate::error::Error;
use crate::provider::SnapshotProvider;
use crate::snapshot::Snapshot;
use crate::store::{CycleBatch, DeviceUpsert, EventStore, PortUpsert};
use crate::subscriber::EventSubscriber;
use chrono::{DateTime, Utc};
use config::{Config, Diagnostics};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, trace, warn};

pub struct Services {
    pub provider: Arc<dyn SnapshotProvider>,
    pub store: Arc<dyn EventStore>,
    pub clock: Box<dyn Clock + Send + Sync>,
}

pub enum ControlEvent {
    /// Poll now instead of waiting for the interval, e.g. on a hot-plug
    /// notification.
    Rescan,
    Reload(Box<Config>),
    /// Persist a finished diagnostic through the loop's single writer.
    RecordThroughput(Box<ThroughputResult>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Polling,
    Diffing,
    Persisting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// The provider failed; the last good snapshot is still published.
    EnumerationFailing { reason: String },
    /// Batches are queued and being retried.
    StoreRetrying { attempts: u32 },
    /// Retries hit the configured limit. Batches stay queued.
    StoreUnavailable { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopStatus {
    pub phase: Phase,
    pub health: Health,
    pub last_cycle: u64,
    pub pending_batches: usize,
    pub devices: usize,
    pub ports: usize,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            health: Health::Healthy,
            last_cycle: 0,
            pending_batches: 0,
            devices: 0,
            ports: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub cycle_id: u64,
    /// Events produced by this cycle.
    pub events: usize,
    /// Cycle ids written to the store during this tick, oldest first.
    pub persisted: Vec<u64>,
    pub pending: usize,
    /// Stopped between phases by a cancellation request.
    pub interrupted: bool,
}

pub struct MonitorEngine {
    config: Config,
    services: Services,
    previous: Arc<Snapshot>,
    cycle_id: u64,
    pending: VecDeque<CycleBatch>,
    store_failures: u32,
    enumeration_failure: Option<String>,
    subscribers: Vec<Box<dyn EventSubscriber>>,
    status_tx: watch::Sender<LoopStatus>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    diagnostics_tx: watch::Sender<Diagnostics>,
}

impl MonitorEngine {
    /// Create an engine that starts from an empty snapshot, so everything
    /// attached is reported as connected. Cycle ids still continue after the
    /// highest stored one; a reused id would collide with logged events.
    pub async fn new(config: Config, services: Services) -> Result<Self, Error> {
        let cycle_id = services.store.last_cycle_id().await?.unwrap_or(0);
        Ok(Self::with_state(config, services, Snapshot::new(), cycle_id))
    }

    /// Seed the previous snapshot and cycle counter from the store, so a
    /// restart neither replays connections nor reuses cycle ids.
    pub async fn load(config: Config, services: Services) -> Result<Self, Error> {
        let seeded = services.store.connected_snapshot().await?;
        let cycle_id = services.store.last_cycle_id().await?.unwrap_or(0);
        info!(
            devices = seeded.devices.len(),
            ports = seeded.ports.len(),
            cycle_id,
            "reconciling with stored state"
        );
        Ok(Self::with_state(config, services, seeded, cycle_id))
    }

    fn with_state(config: Config, services: Services, seeded: Snapshot, cycle_id: u64) -> Self {
        let previous = Arc::new(Self::tracked(&config, seeded));
        let status = LoopStatus {
            last_cycle: cycle_id,
            devices: previous.devices.len(),
            ports: previous.ports.len(),
            ..LoopStatus::default()
        };
        let (status_tx, _) = watch::channel(status);
        let (snapshot_tx, _) = watch::channel(Arc::clone(&previous));
        let (diagnostics_tx, _) = watch::channel(config.diagnostics.clone());
        Self {
            config,
            services,
            previous,
            cycle_id,
            pending: VecDeque::new(),
            store_failures: 0,
            enumeration_failure: None,
            subscribers: Vec::new(),
            status_tx,
            snapshot_tx,
            diagnostics_tx,
        }
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn phase(&self) -> Phase {
        self.status_tx.borrow().phase
    }

    pub fn status(&self) -> watch::Receiver<LoopStatus> {
        self.status_tx.subscribe()
    }

    /// Last successfully enumerated snapshot.
    pub fn snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Diagnostic settings, updated on every reload.
    pub fn diagnostics(&self) -> watch::Receiver<Diagnostics> {
        self.diagnostics_tx.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    /// Run one poll/diff/persist cycle without sleeping.
    pub async fn tick(&mut self) -> Result<TickReport, Error> {
        self.cycle(&CancellationToken::new()).await
    }

    /// Poll until `cancel` fires. Enumeration and store failures are logged
    /// and retried; only a broken runtime ends the loop early.
    pub async fn run_until(
        &mut self,
        cancel: CancellationToken,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Result<(), Error> {
        let mut control_open = true;

        'poll: loop {
            let tick_start = self.services.clock.now();

            match self.cycle(&cancel).await {
                Ok(report) if report.interrupted => break 'poll,
                Ok(_) => {}
                Err(err @ Error::StoreRetriesExhausted { .. }) => {
                    error!(%err, "event store unavailable; batches stay queued");
                }
                Err(Error::Join(err)) => return Err(Error::Join(err)),
                Err(err) => warn!(%err, "monitoring cycle failed"),
            }

            loop {
                let elapsed = self
                    .services
                    .clock
                    .now()
                    .saturating_duration_since(tick_start);
                let remaining = self.config.monitor.poll_interval.saturating_sub(elapsed);

                tokio::select! {
                    _ = cancel.cancelled() => break 'poll,
                    event = control_rx.recv(), if control_open => match event {
                        Some(ControlEvent::Rescan) => {
                            debug!("rescan requested");
                            break;
                        }
                        Some(event) => self.handle_control(event).await,
                        None => control_open = false,
                    },
                    _ = self.services.clock.sleep(remaining) => break,
                }
            }
        }

        info!("shutdown requested");
        if !self.pending.is_empty() {
            match self.flush_pending().await {
                Ok(persisted) => debug!(batches = persisted.len(), "flushed pending batches"),
                Err(err) => error!(
                    %err,
                    pending = self.pending.len(),
                    "unpersisted batches lost on shutdown"
                ),
            }
        }
        self.set_phase(Phase::Idle);
        Ok(())
    }

    async fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Rescan => {}
            ControlEvent::Reload(config) => {
                self.apply_reload(*config);
                info!("config reloaded");
            }
            ControlEvent::RecordThroughput(result) => {
                match self.services.store.record_throughput(&result).await {
                    Ok(()) => info!(
                        device = %result.device,
                        rating = ?result.assessment.rating,
                        "throughput result recorded"
                    ),
                    Err(err) => error!(device = %result.device, %err, "failed to record throughput"),
                }
            }
        }
    }

    fn apply_reload(&mut self, mut config: Config) {
        if config.persistence.database_path != self.config.persistence.database_path {
            warn!(
                current = ?self.config.persistence.database_path,
                requested = ?config.persistence.database_path,
                "ignoring database_path change during reload"
            );
            config.persistence.database_path = self.config.persistence.database_path.clone();
        }
        self.diagnostics_tx.send_if_modified(|current| {
            if *current == config.diagnostics {
                return false;
            }
            *current = config.diagnostics.clone();
            true
        });
        self.config = config;
    }

    async fn cycle(&mut self, cancel: &CancellationToken) -> Result<TickReport, Error> {
        self.cycle_id = self.cycle_id.saturating_add(1);
        let cycle_id = self.cycle_id;
        let span = debug_span!("cycle", cycle = cycle_id);
        self.run_phases(cycle_id, cancel).instrument(span).await
    }

    async fn run_phases(
        &mut self,
        cycle_id: u64,
        cancel: &CancellationToken,
    ) -> Result<TickReport, Error> {
        let mut report = TickReport {
            cycle_id,
            events: 0,
            persisted: Vec::new(),
            pending: self.pending.len(),
            interrupted: false,
        };

        self.set_phase(Phase::Polling);
        let observed_at = self.services.clock.wall();
        let provider = Arc::clone(&self.services.provider);
        let polled = tokio::task::spawn_blocking(move || provider.snapshot()).await?;

        if cancel.is_cancelled() {
            report.interrupted = true;
            return Ok(report);
        }

        self.set_phase(Phase::Diffing);
        let batch = match polled {
            Ok(snapshot) => {
                if self.enumeration_failure.take().is_some() {
                    info!("enumeration recovered");
                    if self.store_failures == 0 {
                        self.set_health(Health::Healthy);
                    }
                }
                let current = Arc::new(Self::tracked(&self.config, snapshot));
                let batch = self.reconcile(cycle_id, observed_at, &current);
                self.previous = current;
                self.snapshot_tx.send_replace(Arc::clone(&self.previous));
                batch
            }
            Err(err) => {
                let mut batch = CycleBatch::new(cycle_id, observed_at);
                let reason = err.to_string();
                if self.enumeration_failure.is_none() {
                    warn!(%err, "enumeration failed; keeping last snapshot");
                    batch.events.push(ConnectionEvent::error(
                        format!("Enumeration failed: {reason}"),
                        observed_at,
                    ));
                } else {
                    debug!(%err, "enumeration still failing");
                }
                if self.store_failures == 0 {
                    self.set_health(Health::EnumerationFailing {
                        reason: reason.clone(),
                    });
                }
                self.enumeration_failure = Some(reason);
                batch
            }
        };
        report.events = batch.events.len();
        self.enqueue(batch);

        if cancel.is_cancelled() {
            report.pending = self.pending.len();
            report.interrupted = true;
            return Ok(report);
        }

        self.set_phase(Phase::Persisting);
        let flushed = self.flush_pending().await;
        report.pending = self.pending.len();
        self.status_tx.send_modify(|status| {
            status.last_cycle = cycle_id;
            status.pending_batches = self.pending.len();
            status.devices = self.previous.devices.len();
            status.ports = self.previous.ports.len();
        });
        self.set_phase(Phase::Idle);

        report.persisted = flushed?;
        Ok(report)
    }

    /// Turn the difference between the previous and current snapshot into a
    /// batch of projection updates and events.
    fn reconcile(
        &self,
        cycle_id: u64,
        observed_at: DateTime<Utc>,
        current: &Snapshot,
    ) -> CycleBatch {
        let changes = diff(&self.previous, current);
        let mut batch = CycleBatch::new(cycle_id, observed_at);

        for record in current.devices.values() {
            batch.devices.push(DeviceUpsert {
                record: record.clone(),
                state: record.state(),
                seen: Some(observed_at),
            });
        }
        for record in current.ports.values() {
            batch.ports.push(PortUpsert {
                line: record.line_settings(&self.config.serial),
                record: record.clone(),
            });
        }

        for change in &changes {
            match change {
                Change::DeviceDisconnected { record, .. } => batch.devices.push(DeviceUpsert {
                    record: record.clone(),
                    state: ConnectionState::Disconnected,
                    seen: None,
                }),
                Change::PortDisconnected { name, .. } => batch.departed_ports.push(name.clone()),
                _ => {}
            }
            trace!(kind = %change.kind(), ?change, "change detected");
        }

        batch.events = changes
            .iter()
            .map(|change| change.to_event(observed_at))
            .collect();
        if !batch.events.is_empty() {
            debug!(events = batch.events.len(), "snapshot changed");
        }
        batch
    }

    fn enqueue(&mut self, batch: CycleBatch) {
        // While a backlog exists, a batch without events only carries
        // projections the next batch will refresh anyway.
        if batch.events.is_empty() && !self.pending.is_empty() {
            trace!(cycle = batch.cycle_id, "skipping event-less batch during backlog");
            return;
        }

        self.pending.push_back(batch);
        while self.pending.len() > self.config.monitor.max_pending_batches.max(1) {
            if let Some(dropped) = self.pending.pop_front() {
                error!(
                    cycle = dropped.cycle_id,
                    events = dropped.events.len(),
                    "pending queue full; dropping oldest unpersisted batch"
                );
            }
        }
    }

    /// Persist queued batches oldest first, publishing each one after it is
    /// written. Stops at the first failure so ordering is preserved.
    async fn flush_pending(&mut self) -> Result<Vec<u64>, Error> {
        let mut persisted = Vec::new();

        while let Some(batch) = self.pending.front() {
            if let Err(err) = self.services.store.persist(batch).await {
                let cycle = batch.cycle_id;
                self.store_failures = self.store_failures.saturating_add(1);
                let attempts = self.store_failures;
                let limit = self.config.monitor.store_retry_limit;
                let err = Error::StoreWrite {
                    cycle,
                    source: Box::new(err),
                };

                if attempts >= limit {
                    self.set_health(Health::StoreUnavailable { attempts });
                    warn!(%err, attempts, "store retry limit reached");
                    return Err(Error::StoreRetriesExhausted { cycle, attempts });
                }
                self.set_health(Health::StoreRetrying { attempts });
                warn!(%err, attempts, limit, "store write failed; will retry");
                return Ok(persisted);
            }

            if self.store_failures > 0 {
                info!(attempts = self.store_failures, "event store recovered");
                self.store_failures = 0;
                self.set_health(match &self.enumeration_failure {
                    Some(reason) => Health::EnumerationFailing {
                        reason: reason.clone(),
                    },
                    None => Health::Healthy,
                });
            }

            let Some(batch) = self.pending.pop_front() else {
                break;
            };
            persisted.push(batch.cycle_id);
            self.publish(batch);
        }

        Ok(persisted)
    }

    fn publish(&self, batch: CycleBatch) {
        if batch.events.is_empty() {
            return;
        }
        let batch = EventBatch {
            cycle_id: batch.cycle_id,
            events: batch.events,
        };
        for subscriber in &self.subscribers {
            subscriber.on_events(&batch);
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.status_tx.send_modify(|status| status.phase = phase);
    }

    fn set_health(&self, health: Health) {
        self.status_tx.send_if_modified(|status| {
            if status.health == health {
                return false;
            }
            status.health = health;
            true
        });
    }

    fn tracked(config: &Config, mut snapshot: Snapshot) -> Snapshot {
        if !config.monitor.track_devices {
            snapshot.devices.clear();
            snapshot.collisions.clear();
        }
        if !config.monitor.track_ports {
            snapshot.ports.clear();
        }
        snapshot
    }
}

