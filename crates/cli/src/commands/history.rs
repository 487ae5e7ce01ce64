use super::{flush, open_store};
use crate::cli::HistoryArgs;
use chrono::{DateTime, Utc};
use config::Config;
use monitor::EventStore;
use monitor::domain::{DeviceKey, LoggedEvent, PortName};
use std::io::Write;

pub(super) async fn run(
    out: &mut impl Write,
    config: &Config,
    args: &HistoryArgs,
) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let since = args.since.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let until = args.until.unwrap_or(DateTime::<Utc>::MAX_UTC);

    let events = match (&args.device, &args.port) {
        (Some(key), _) => store.events_for_device(&DeviceKey::from_raw(key.as_str())).await?,
        (None, Some(name)) => store.events_for_port(&PortName::new(name.as_str())).await?,
        (None, None) => store.events_between(since, until).await?,
    };
    let events: Vec<_> = events
        .into_iter()
        .filter(|logged| (since..=until).contains(&logged.event.timestamp))
        .collect();

    render(out, &events)?;
    flush(out)?;
    store.close().await;
    Ok(())
}

fn render(out: &mut impl Write, events: &[LoggedEvent]) -> std::io::Result<()> {
    for logged in events {
        let event = &logged.event;
        writeln!(
            out,
            "{}  #{:<6} {:<18} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            logged.cycle_id,
            event.kind.as_str(),
            event.description
        )?;
        for change in &event.changes {
            writeln!(out, "    {}: {} -> {}", change.field, change.old, change.new)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor::domain::{AttributeChange, ConnectionEvent, EventKind};
    use serde_json::json;

    #[test]
    fn changes_are_listed_under_their_event() {
        let timestamp = DateTime::parse_from_rfc3339("2025-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = ConnectionEvent::device(
            EventKind::AttributeChanged,
            DeviceKey::new(0x0781, 0x5581, None),
            "Device changed: Cruzer".into(),
            timestamp,
        )
        .with_changes(vec![AttributeChange {
            field: "power_ma".into(),
            old: json!(100),
            new: json!(500),
        }]);
        let logged = LoggedEvent {
            id: 1,
            cycle_id: 7,
            seq: 0,
            event,
        };

        let mut out = Vec::new();
        render(&mut out, &[logged]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2025-03-01 09:00:00.000  #7"));
        assert!(lines[0].contains("attribute_changed"));
        assert!(lines[0].ends_with("Device changed: Cruzer"));
        assert_eq!(lines[1], "    power_ma: 100 -> 500");
    }
}
