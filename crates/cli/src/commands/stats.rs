use super::{flush, open_store};
use config::Config;
use monitor::EventStore;
use monitor::store::Statistics;
use std::io::Write;

pub(super) async fn run(out: &mut impl Write, config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let stats = store.statistics().await?;
    store.close().await;

    if json {
        serde_json::to_writer_pretty(&mut *out, &stats)?;
        writeln!(out)?;
    } else {
        render(out, &stats)?;
    }
    flush(out)?;
    Ok(())
}

fn render(out: &mut impl Write, stats: &Statistics) -> std::io::Result<()> {
    let devices = &stats.devices;
    writeln!(
        out,
        "devices: {} total, {} connected, {} disconnected",
        devices.total, devices.connected, devices.disconnected
    )?;
    for (class, count) in &devices.by_class {
        writeln!(out, "  class {class}: {count}")?;
    }
    for (manufacturer, count) in &devices.by_manufacturer {
        writeln!(out, "  manufacturer {manufacturer}: {count}")?;
    }

    let ports = &stats.ports;
    writeln!(
        out,
        "ports: {} total, {} available, {} unavailable",
        ports.total, ports.available, ports.unavailable
    )?;
    for (kind, count) in &ports.by_kind {
        writeln!(out, "  {kind:?}: {count}")?;
    }
    Ok(())
}
