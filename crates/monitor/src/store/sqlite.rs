#![forbid(unsafe_code)]

use super::codec::{from_text, millis, opt_from_text, opt_text, opt_timestamp, text, timestamp};
use super::{CycleBatch, DeviceUpsert, EventStore, PortUpsert};
use crate::domain::{
    ConnectionEvent, ConnectionState, Device, DeviceKey, LineSettings, LoggedEvent, Port,
    PortName, ThroughputResult,
};
use crate::error::Error;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, trace};

const DEVICE_COLUMNS: &str = "key, vendor_id, product_id, serial, name, description, manufacturer, \
     class, usb_version, link_speed, power_ma, driver, mount_point, state, first_seen, last_seen";

const PORT_COLUMNS: &str = "id, name, device_key, description, baud_rate, data_bits, stop_bits, \
     parity, flow_control, available, last_used, created_at, removed_at";

const EVENT_COLUMNS: &str =
    "id, cycle_id, seq, kind, device_key, port_name, description, changes, timestamp";

/// Event store backed by a SQLite database file, or by a private in-memory
/// database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and bring its schema up to
    /// date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        // One writer plus concurrent readers under WAL.
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        debug!(path = %path.display(), "event store opened");
        Ok(Self {
            pool,
            path: Some(path),
        })
    }

    /// A database that lives as long as this store.
    pub async fn in_memory() -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to `:memory:` is a separate database, so keep
        // exactly one alive for the lifetime of the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        Ok(Self { pool, path: None })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), Error> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }

    /// Database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn upsert_device(
        conn: &mut SqliteConnection,
        upsert: &DeviceUpsert,
        observed_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let record = &upsert.record;
        let key = record.key();
        let state = text(&upsert.state)?;
        let usb_version = opt_text(record.usb_version.as_ref())?;
        let link_speed = opt_text(record.link_speed.as_ref())?;
        let mount_point = record
            .mount_point
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let exists = sqlx::query("SELECT 1 FROM devices WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&mut *conn)
            .await?
            .is_some();

        if !exists {
            let seen = millis(upsert.seen.unwrap_or(observed_at));
            sqlx::query(
                "INSERT INTO devices (key, vendor_id, product_id, serial, name, description, \
                 manufacturer, class, usb_version, link_speed, power_ma, driver, mount_point, \
                 state, first_seen, last_seen) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(key.as_str())
            .bind(i64::from(record.vendor_id))
            .bind(i64::from(record.product_id))
            .bind(record.serial.as_deref())
            .bind(record.display_name())
            .bind(record.description.as_deref())
            .bind(record.manufacturer.as_deref())
            .bind(record.class.as_deref())
            .bind(usb_version)
            .bind(link_speed)
            .bind(record.power_ma.map(i64::from))
            .bind(record.driver.as_deref())
            .bind(mount_point)
            .bind(state)
            .bind(seen)
            .bind(seen)
            .execute(&mut *conn)
            .await?;
            trace!(%key, "device inserted");
            return Ok(());
        }

        // Attributes the provider did not report keep their stored value.
        sqlx::query(
            "UPDATE devices SET \
             name = COALESCE(?, name), \
             description = COALESCE(?, description), \
             manufacturer = COALESCE(?, manufacturer), \
             class = COALESCE(?, class), \
             usb_version = COALESCE(?, usb_version), \
             link_speed = COALESCE(?, link_speed), \
             power_ma = COALESCE(?, power_ma), \
             driver = COALESCE(?, driver), \
             mount_point = COALESCE(?, mount_point), \
             state = ?, \
             last_seen = MAX(last_seen, ?) \
             WHERE key = ?",
        )
        .bind(record.name.as_deref())
        .bind(record.description.as_deref())
        .bind(record.manufacturer.as_deref())
        .bind(record.class.as_deref())
        .bind(usb_version)
        .bind(link_speed)
        .bind(record.power_ma.map(i64::from))
        .bind(record.driver.as_deref())
        .bind(mount_point)
        .bind(state)
        .bind(upsert.seen.map(millis).unwrap_or(i64::MIN))
        .bind(key.as_str())
        .execute(&mut *conn)
        .await?;
        trace!(%key, "device updated");
        Ok(())
    }

    async fn upsert_port(
        conn: &mut SqliteConnection,
        upsert: &PortUpsert,
        observed_at: i64,
    ) -> Result<(), Error> {
        let record = &upsert.record;
        let used = (record.available != Some(false)).then_some(observed_at);

        let open: Option<i64> =
            sqlx::query_scalar("SELECT id FROM ports WHERE name = ? AND removed_at IS NULL")
                .bind(record.name.as_str())
                .fetch_optional(&mut *conn)
                .await?;

        let Some(id) = open else {
            let LineSettings {
                baud_rate,
                data_bits,
                stop_bits,
                parity,
                flow_control,
            } = upsert.line;
            sqlx::query(
                "INSERT INTO ports (name, device_key, description, baud_rate, data_bits, \
                 stop_bits, parity, flow_control, available, last_used, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.name.as_str())
            .bind(record.device.as_ref().map(DeviceKey::as_str))
            .bind(record.description.as_deref())
            .bind(i64::from(baud_rate))
            .bind(i64::from(data_bits))
            .bind(text(&stop_bits)?)
            .bind(text(&parity)?)
            .bind(text(&flow_control)?)
            .bind(record.available.unwrap_or(true))
            .bind(used)
            .bind(observed_at)
            .execute(&mut *conn)
            .await?;
            trace!(port = %record.name, "port appearance recorded");
            return Ok(());
        };

        sqlx::query(
            "UPDATE ports SET \
             device_key = COALESCE(?1, device_key), \
             description = COALESCE(?2, description), \
             baud_rate = COALESCE(?3, baud_rate), \
             data_bits = COALESCE(?4, data_bits), \
             stop_bits = COALESCE(?5, stop_bits), \
             parity = COALESCE(?6, parity), \
             flow_control = COALESCE(?7, flow_control), \
             available = COALESCE(?8, available), \
             last_used = CASE WHEN ?9 IS NULL THEN last_used \
                         ELSE MAX(COALESCE(last_used, ?9), ?9) END \
             WHERE id = ?10",
        )
        .bind(record.device.as_ref().map(DeviceKey::as_str))
        .bind(record.description.as_deref())
        .bind(record.baud_rate.map(i64::from))
        .bind(record.data_bits.map(i64::from))
        .bind(opt_text(record.stop_bits.as_ref())?)
        .bind(opt_text(record.parity.as_ref())?)
        .bind(opt_text(record.flow_control.as_ref())?)
        .bind(record.available)
        .bind(used)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn append_event(
        conn: &mut SqliteConnection,
        cycle_id: u64,
        seq: usize,
        event: &ConnectionEvent,
    ) -> Result<bool, Error> {
        let changes = if event.changes.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&event.changes)?)
        };
        let port_name = event.port.as_ref().map(PortName::as_str);

        // `INSERT OR IGNORE` against UNIQUE(cycle_id, seq) makes a retried
        // batch a no-op.
        let result = sqlx::query(
            "INSERT OR IGNORE INTO connection_log \
             (cycle_id, seq, kind, device_key, port_id, port_name, description, changes, timestamp) \
             VALUES (?, ?, ?, \
             (SELECT key FROM devices WHERE key = ?), \
             (SELECT id FROM ports WHERE name = ? ORDER BY id DESC LIMIT 1), \
             ?, ?, ?, ?)",
        )
        .bind(cycle_id as i64)
        .bind(seq as i64)
        .bind(event.kind.as_str())
        .bind(event.device.as_ref().map(DeviceKey::as_str))
        .bind(port_name)
        .bind(port_name)
        .bind(event.description.as_str())
        .bind(changes)
        .bind(millis(event.timestamp))
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_events(
        &self,
        filter: &str,
        bind: EventFilter<'_>,
    ) -> Result<Vec<LoggedEvent>, Error> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM connection_log WHERE {filter} ORDER BY timestamp, id"
        );
        let query = sqlx::query(&sql);
        let query = match bind {
            EventFilter::Text(value) => query.bind(value),
            EventFilter::Range(from, to) => query.bind(from).bind(to),
        };
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }
}

enum EventFilter<'a> {
    Text(&'a str),
    Range(i64, i64),
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn persist(&self, batch: &CycleBatch) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        for upsert in &batch.devices {
            Self::upsert_device(&mut tx, upsert, batch.observed_at).await?;
        }

        let observed_at = millis(batch.observed_at);
        for upsert in &batch.ports {
            Self::upsert_port(&mut tx, upsert, observed_at).await?;
        }

        for name in &batch.departed_ports {
            sqlx::query(
                "UPDATE ports SET available = 0, removed_at = ? \
                 WHERE name = ? AND removed_at IS NULL",
            )
            .bind(observed_at)
            .bind(name.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let mut appended = 0usize;
        for (seq, event) in batch.events.iter().enumerate() {
            if Self::append_event(&mut tx, batch.cycle_id, seq, event).await? {
                appended += 1;
            }
        }

        tx.commit().await?;
        debug!(
            cycle = batch.cycle_id,
            events = batch.events.len(),
            appended,
            "cycle persisted"
        );
        Ok(())
    }

    async fn record_throughput(&self, result: &ThroughputResult) -> Result<(), Error> {
        let assessment = &result.assessment;
        sqlx::query(
            "INSERT INTO throughput_results (device_key, sample_size, write_speed, read_speed, \
             theoretical, efficiency, rating, measurement, assessment, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(result.device.as_str())
        .bind(result.measurement.sample_size as i64)
        .bind(result.measurement.write_speed)
        .bind(result.measurement.read_speed)
        .bind(assessment.theoretical)
        .bind(assessment.efficiency)
        .bind(assessment.rating.map(|r| r.as_str()))
        .bind(serde_json::to_string(&result.measurement)?)
        .bind(serde_json::to_string(assessment)?)
        .bind(millis(result.recorded_at))
        .execute(&self.pool)
        .await?;
        debug!(device = %result.device, "throughput result recorded");
        Ok(())
    }

    async fn connected_snapshot(&self) -> Result<Snapshot, Error> {
        let sql = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE state = ? ORDER BY first_seen, key"
        );
        let devices = sqlx::query(&sql)
            .bind(text(&ConnectionState::Connected)?)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(device_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let sql = format!("SELECT {PORT_COLUMNS} FROM ports WHERE removed_at IS NULL ORDER BY id");
        let ports = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(port_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Snapshot::from_records(
            devices.iter().map(Device::to_record),
            ports.iter().map(Port::to_record),
        ))
    }

    async fn last_cycle_id(&self) -> Result<Option<u64>, Error> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(cycle_id) FROM connection_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map(|id| id as u64))
    }

    async fn device(&self, key: &DeviceKey) -> Result<Option<Device>, Error> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE key = ?");
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn devices(&self) -> Result<Vec<Device>, Error> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY first_seen, key");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn ports(&self) -> Result<Vec<Port>, Error> {
        let sql = format!("SELECT {PORT_COLUMNS} FROM ports ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(port_from_row).collect()
    }

    async fn port_history(&self, name: &PortName) -> Result<Vec<Port>, Error> {
        let sql = format!("SELECT {PORT_COLUMNS} FROM ports WHERE name = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(name.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(port_from_row).collect()
    }

    async fn events_for_device(&self, key: &DeviceKey) -> Result<Vec<LoggedEvent>, Error> {
        self.query_events("device_key = ?", EventFilter::Text(key.as_str()))
            .await
    }

    async fn events_for_port(&self, name: &PortName) -> Result<Vec<LoggedEvent>, Error> {
        self.query_events("port_name = ?", EventFilter::Text(name.as_str()))
            .await
    }

    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LoggedEvent>, Error> {
        self.query_events(
            "timestamp >= ? AND timestamp <= ?",
            EventFilter::Range(millis(from), millis(to)),
        )
        .await
    }

    async fn throughput_results(&self, key: &DeviceKey) -> Result<Vec<ThroughputResult>, Error> {
        let rows = sqlx::query(
            "SELECT device_key, measurement, assessment, recorded_at FROM throughput_results \
             WHERE device_key = ? ORDER BY recorded_at, id",
        )
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(throughput_from_row).collect()
    }

    async fn all_throughput_results(&self) -> Result<Vec<ThroughputResult>, Error> {
        let rows = sqlx::query(
            "SELECT device_key, measurement, assessment, recorded_at FROM throughput_results \
             ORDER BY recorded_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(throughput_from_row).collect()
    }
}

fn id_u16(table: &'static str, raw: i64) -> Result<u16, Error> {
    u16::try_from(raw).map_err(|err| Error::corrupt(table, err))
}

fn device_from_row(row: &SqliteRow) -> Result<Device, Error> {
    let power_ma: Option<i64> = row.try_get("power_ma")?;
    let mount_point: Option<String> = row.try_get("mount_point")?;
    Ok(Device {
        key: DeviceKey::from_raw(row.try_get::<String, _>("key")?),
        vendor_id: id_u16("devices", row.try_get("vendor_id")?)?,
        product_id: id_u16("devices", row.try_get("product_id")?)?,
        serial: row.try_get("serial")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        manufacturer: row.try_get("manufacturer")?,
        class: row.try_get("class")?,
        usb_version: opt_from_text(row.try_get("usb_version")?)?,
        link_speed: opt_from_text(row.try_get("link_speed")?)?,
        power_ma: power_ma
            .map(u32::try_from)
            .transpose()
            .map_err(|err| Error::corrupt("devices", err))?,
        driver: row.try_get("driver")?,
        mount_point: mount_point.map(PathBuf::from),
        state: from_text(row.try_get("state")?)?,
        first_seen: timestamp("devices", row.try_get("first_seen")?)?,
        last_seen: timestamp("devices", row.try_get("last_seen")?)?,
    })
}

fn port_from_row(row: &SqliteRow) -> Result<Port, Error> {
    let device_key: Option<String> = row.try_get("device_key")?;
    let baud_rate: i64 = row.try_get("baud_rate")?;
    let data_bits: i64 = row.try_get("data_bits")?;
    Ok(Port {
        id: row.try_get("id")?,
        name: PortName::new(row.try_get::<String, _>("name")?),
        device: device_key.map(DeviceKey::from_raw),
        description: row.try_get("description")?,
        line: LineSettings {
            baud_rate: u32::try_from(baud_rate).map_err(|err| Error::corrupt("ports", err))?,
            data_bits: u8::try_from(data_bits).map_err(|err| Error::corrupt("ports", err))?,
            stop_bits: from_text(row.try_get("stop_bits")?)?,
            parity: from_text(row.try_get("parity")?)?,
            flow_control: from_text(row.try_get("flow_control")?)?,
        },
        available: row.try_get("available")?,
        last_used: opt_timestamp("ports", row.try_get("last_used")?)?,
        created_at: timestamp("ports", row.try_get("created_at")?)?,
        removed_at: opt_timestamp("ports", row.try_get("removed_at")?)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<LoggedEvent, Error> {
    let cycle_id: i64 = row.try_get("cycle_id")?;
    let seq: i64 = row.try_get("seq")?;
    let device_key: Option<String> = row.try_get("device_key")?;
    let port_name: Option<String> = row.try_get("port_name")?;
    let changes: Option<String> = row.try_get("changes")?;
    Ok(LoggedEvent {
        id: row.try_get("id")?,
        cycle_id: cycle_id as u64,
        seq: u32::try_from(seq).map_err(|err| Error::corrupt("connection_log", err))?,
        event: ConnectionEvent {
            kind: from_text(row.try_get("kind")?)?,
            device: device_key.map(DeviceKey::from_raw),
            port: port_name.map(PortName::new),
            description: row.try_get("description")?,
            changes: match changes {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Vec::new(),
            },
            timestamp: timestamp("connection_log", row.try_get("timestamp")?)?,
        },
    })
}

fn throughput_from_row(row: &SqliteRow) -> Result<ThroughputResult, Error> {
    let measurement: String = row.try_get("measurement")?;
    let assessment: String = row.try_get("assessment")?;
    Ok(ThroughputResult {
        device: DeviceKey::from_raw(row.try_get::<String, _>("device_key")?),
        measurement: serde_json::from_str(&measurement)?,
        assessment: serde_json::from_str(&assessment)?,
        recorded_at: timestamp("throughput_results", row.try_get("recorded_at")?)?,
    })
}
