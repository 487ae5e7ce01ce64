#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use config::{Serial, Thresholds};
use monitor::domain::{
    ConnectionEvent, ConnectionState, DeviceKey, DeviceRecord, EventKind, PortKind, PortName,
    PortRecord, ThroughputResult,
};
use monitor::store::{CycleBatch, DeviceUpsert, EventStore, PortUpsert, SqliteStore};
use pretty_assertions::assert_eq;
use std::time::Duration as StdDuration;
use tempfile::tempdir;
use throughput::{LinkSpeed, Measurement, Rating, assess};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn stick() -> DeviceRecord {
    DeviceRecord::new(0x0781, 0x5581)
        .with_serial("4C53")
        .with_name("Ultra")
        .with_link_speed(LinkSpeed::Super)
}

fn seen(record: DeviceRecord, when: DateTime<Utc>) -> DeviceUpsert {
    DeviceUpsert {
        record,
        state: ConnectionState::Connected,
        seen: Some(when),
    }
}

fn port(record: PortRecord) -> PortUpsert {
    PortUpsert {
        line: record.line_settings(&Serial::default()),
        record,
    }
}

fn connect_batch(cycle_id: u64, when: DateTime<Utc>) -> CycleBatch {
    let mut batch = CycleBatch::new(cycle_id, when);
    batch.devices.push(seen(stick(), when));
    batch.events.push(ConnectionEvent::device(
        EventKind::Connected,
        stick().key(),
        "Device connected: Ultra".into(),
        when,
    ));
    batch
}

#[tokio::test]
async fn upsert_keeps_first_seen() {
    let store = SqliteStore::in_memory().await.unwrap();
    let key = stick().key();

    store.persist(&connect_batch(1, at(0))).await.unwrap();
    let first = store.device(&key).await.unwrap().unwrap();
    assert_eq!(first.first_seen, at(0));
    assert_eq!(first.last_seen, at(0));

    for (cycle, secs) in [(2, 10), (3, 20)] {
        let mut batch = CycleBatch::new(cycle, at(secs));
        batch.devices.push(seen(stick().with_name("Ultra Fit"), at(secs)));
        store.persist(&batch).await.unwrap();
    }

    let device = store.device(&key).await.unwrap().unwrap();
    assert_eq!(device.first_seen, at(0));
    assert_eq!(device.last_seen, at(20));
    assert!(device.first_seen <= device.last_seen);
    assert_eq!(device.name, "Ultra Fit");
    assert_eq!(device.link_speed, Some(LinkSpeed::Super));
    assert!(device.is_connected());
}

#[tokio::test]
async fn missing_attributes_keep_stored_values() {
    let store = SqliteStore::in_memory().await.unwrap();
    store.persist(&connect_batch(1, at(0))).await.unwrap();

    let bare = DeviceRecord::new(0x0781, 0x5581).with_serial("4C53");
    let mut batch = CycleBatch::new(2, at(5));
    batch.devices.push(seen(bare, at(5)));
    store.persist(&batch).await.unwrap();

    let device = store.device(&stick().key()).await.unwrap().unwrap();
    assert_eq!(device.name, "Ultra");
    assert_eq!(device.link_speed, Some(LinkSpeed::Super));
}

#[tokio::test]
async fn replayed_batch_is_not_duplicated() {
    let store = SqliteStore::in_memory().await.unwrap();
    let batch = connect_batch(7, at(0));

    store.persist(&batch).await.unwrap();
    store.persist(&batch).await.unwrap();

    let events = store.events_for_device(&stick().key()).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].cycle_id, 7);
    assert_eq!(events[0].seq, 0);
    assert_eq!(events[0].event.kind, EventKind::Connected);
    assert_eq!(store.last_cycle_id().await.unwrap(), Some(7));

    // A new cycle appending the same event is a distinct entry.
    let mut again = batch.clone();
    again.cycle_id = 8;
    store.persist(&again).await.unwrap();
    assert_eq!(store.events_for_device(&stick().key()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn disconnect_marks_but_never_deletes() {
    let store = SqliteStore::in_memory().await.unwrap();
    store.persist(&connect_batch(1, at(0))).await.unwrap();

    let mut batch = CycleBatch::new(2, at(30));
    batch.devices.push(DeviceUpsert {
        record: stick(),
        state: ConnectionState::Disconnected,
        seen: None,
    });
    batch.events.push(ConnectionEvent::device(
        EventKind::Disconnected,
        stick().key(),
        "Device disconnected: Ultra".into(),
        at(30),
    ));
    store.persist(&batch).await.unwrap();

    let devices = store.devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].state, ConnectionState::Disconnected);
    assert_eq!(devices[0].last_seen, at(0));

    let kinds: Vec<_> = store
        .events_for_device(&stick().key())
        .await
        .unwrap()
        .into_iter()
        .map(|logged| logged.event.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::Connected, EventKind::Disconnected]);
    assert!(store.connected_snapshot().await.unwrap().devices.is_empty());
}

#[tokio::test]
async fn reused_port_name_keeps_history() {
    let store = SqliteStore::in_memory().await.unwrap();
    let name = PortName::new("/dev/ttyUSB0");
    let record = PortRecord::new("/dev/ttyUSB0").with_baud_rate(115200);

    let mut batch = CycleBatch::new(1, at(0));
    batch.ports.push(port(record.clone()));
    store.persist(&batch).await.unwrap();

    let mut batch = CycleBatch::new(2, at(10));
    batch.departed_ports.push(name.clone());
    store.persist(&batch).await.unwrap();

    let mut batch = CycleBatch::new(3, at(20));
    batch.ports.push(port(PortRecord::new("/dev/ttyUSB0")));
    store.persist(&batch).await.unwrap();

    let history = store.port_history(&name).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].created_at, at(0));
    assert_eq!(history[0].removed_at, Some(at(10)));
    assert!(!history[0].available);
    assert_eq!(history[0].line.baud_rate, 115200);
    assert_eq!(history[1].created_at, at(20));
    assert_eq!(history[1].removed_at, None);
    assert_eq!(history[1].line.baud_rate, 9600);
    assert_eq!(history[1].last_used, Some(at(20)));
    assert_eq!(history[1].kind(), PortKind::UsbSerial);

    let snapshot = store.connected_snapshot().await.unwrap();
    assert_eq!(snapshot.ports.len(), 1);
}

#[tokio::test]
async fn port_events_reference_their_rows() {
    let store = SqliteStore::in_memory().await.unwrap();
    let device = stick().key();

    let mut batch = connect_batch(1, at(0));
    batch
        .ports
        .push(port(PortRecord::new("COM4").with_device(device.clone())));
    batch.events.push(ConnectionEvent::port(
        EventKind::Connected,
        PortName::new("COM4"),
        Some(device.clone()),
        "Port available: COM4".into(),
        at(0),
    ));
    store.persist(&batch).await.unwrap();

    let events = store.events_for_port(&PortName::new("COM4")).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[0].event.device, Some(device.clone()));
    assert_eq!(store.events_for_device(&device).await.unwrap().len(), 2);
}

#[tokio::test]
async fn time_range_query() {
    let store = SqliteStore::in_memory().await.unwrap();
    for cycle in 0..5 {
        let mut batch = CycleBatch::new(cycle + 1, at(cycle as i64 * 60));
        batch.events.push(ConnectionEvent::error(
            format!("event {cycle}"),
            at(cycle as i64 * 60),
        ));
        store.persist(&batch).await.unwrap();
    }

    let events = store
        .events_between(at(60), at(60) + Duration::seconds(120))
        .await
        .unwrap();

    let descriptions: Vec<_> = events.iter().map(|e| e.event.description.as_str()).collect();
    assert_eq!(descriptions, vec!["event 1", "event 2", "event 3"]);
}

#[tokio::test]
async fn throughput_results_round_trip() {
    let store = SqliteStore::in_memory().await.unwrap();
    store.persist(&connect_batch(1, at(0))).await.unwrap();

    let measurement = Measurement::from_durations(
        500_000_000,
        StdDuration::from_secs(1),
        StdDuration::from_millis(909),
    );
    let assessment = assess(&measurement, Some(LinkSpeed::Super), &Thresholds::default());
    let result = ThroughputResult {
        device: stick().key(),
        measurement,
        assessment,
        recorded_at: at(40),
    };
    store.record_throughput(&result).await.unwrap();

    let stored = store.throughput_results(&stick().key()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].device, result.device);
    assert_eq!(stored[0].recorded_at, at(40));
    assert_eq!(stored[0].measurement.sample_size, 500_000_000);
    assert_eq!(stored[0].measurement.write_duration, StdDuration::from_secs(1));
    assert!((stored[0].measurement.write_speed - 500.0).abs() < 1e-6);
    assert_eq!(stored[0].assessment.link, Some(LinkSpeed::Super));
    assert_eq!(stored[0].assessment.rating, Some(Rating::Excellent));
}

#[tokio::test]
async fn throughput_requires_known_device() {
    let store = SqliteStore::in_memory().await.unwrap();
    let measurement =
        Measurement::from_durations(1_000_000, StdDuration::from_secs(1), StdDuration::from_secs(1));
    let result = ThroughputResult {
        device: DeviceKey::new(1, 1, None),
        assessment: assess(&measurement, None, &Thresholds::default()),
        measurement,
        recorded_at: at(0),
    };

    assert!(store.record_throughput(&result).await.is_err());
}

#[tokio::test]
async fn export_and_statistics() {
    let store = SqliteStore::in_memory().await.unwrap();
    let mut batch = connect_batch(1, at(0));
    let mut hub = DeviceRecord::new(0x05e3, 0x0610).with_name("Hub");
    hub.class = Some("Hub".into());
    hub.manufacturer = Some("Genesys".into());
    batch.devices.push(seen(hub, at(0)));
    batch.ports.push(port(PortRecord::new("/dev/ttyUSB0")));
    batch.ports.push(port(PortRecord::new("/dev/ttyS0")));
    store.persist(&batch).await.unwrap();

    let mut batch = CycleBatch::new(2, at(5));
    batch.departed_ports.push(PortName::new("/dev/ttyS0"));
    store.persist(&batch).await.unwrap();

    let export = store.export().await.unwrap();
    assert_eq!(export.devices.len(), 2);
    assert_eq!(export.ports.len(), 2);
    assert_eq!(export.events.len(), 1);
    let json = serde_json::to_value(&export).unwrap();
    let keys: Vec<_> = json["devices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|device| device["key"].as_str().unwrap().to_owned())
        .collect();
    assert!(keys.contains(&"0781:5581:4C53".to_owned()));

    let stats = store.statistics().await.unwrap();
    assert_eq!(stats.devices.total, 2);
    assert_eq!(stats.devices.connected, 2);
    assert_eq!(stats.devices.by_class.get("Hub"), Some(&1));
    assert_eq!(stats.devices.by_class.get("Unknown"), Some(&1));
    assert_eq!(stats.devices.by_manufacturer.get("Genesys"), Some(&1));
    assert_eq!(stats.ports.total, 2);
    assert_eq!(stats.ports.available, 1);
    assert_eq!(stats.ports.unavailable, 1);
    assert_eq!(stats.ports.by_kind.get(&PortKind::Tty), Some(&1));
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/usbwatch.db");

    let store = SqliteStore::open(&path).await.unwrap();
    store.persist(&connect_batch(3, at(0))).await.unwrap();
    store.close().await;

    let reopened = SqliteStore::open(&path).await.unwrap();
    assert_eq!(reopened.path(), Some(path.as_path()));
    assert_eq!(reopened.last_cycle_id().await.unwrap(), Some(3));
    let snapshot = reopened.connected_snapshot().await.unwrap();
    assert_eq!(snapshot.devices.len(), 1);
    assert_eq!(snapshot.devices[0].name.as_deref(), Some("Ultra"));
}
