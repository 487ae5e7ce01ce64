use super::{flush, or_dash};
use monitor::Snapshot;
use monitor::provider::platform_provider;
use serde_json::json;
use std::io::Write;

pub(super) async fn run(out: &mut impl Write, json: bool) -> anyhow::Result<()> {
    let provider = platform_provider();
    let snapshot = tokio::task::spawn_blocking(move || provider.snapshot()).await??;
    if json {
        let devices: Vec<_> = snapshot.devices.values().collect();
        let ports: Vec<_> = snapshot.ports.values().collect();
        serde_json::to_writer_pretty(&mut *out, &json!({ "devices": devices, "ports": ports }))?;
        writeln!(out)?;
    } else {
        render(out, &snapshot)?;
    }
    flush(out)?;
    Ok(())
}

pub(super) fn render(out: &mut impl Write, snapshot: &Snapshot) -> std::io::Result<()> {
    writeln!(out, "{:<24} {:<32} {:<16} MOUNT", "DEVICE", "NAME", "SPEED")?;
    for (key, record) in &snapshot.devices {
        writeln!(
            out,
            "{:<24} {:<32} {:<16} {}",
            key.as_str(),
            record.display_name(),
            or_dash(record.link_speed),
            or_dash(record.mount_point.as_ref().map(|path| path.display()))
        )?;
    }
    writeln!(out)?;
    writeln!(out, "{:<24} {:<24} {:<8} DESCRIPTION", "PORT", "DEVICE", "BAUD")?;
    for (name, record) in &snapshot.ports {
        writeln!(
            out,
            "{:<24} {:<24} {:<8} {}",
            name.as_str(),
            or_dash(record.device.as_ref()),
            or_dash(record.baud_rate),
            or_dash(record.description.as_deref())
        )?;
    }
    for key in &snapshot.collisions {
        writeln!(out, "warning: several devices share the key {key}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor::domain::{DeviceRecord, PortRecord};
    use throughput::LinkSpeed;

    #[test]
    fn table_lists_devices_then_ports() {
        let stick = DeviceRecord::new(0x0781, 0x5581)
            .with_serial("4C53")
            .with_name("Cruzer")
            .with_link_speed(LinkSpeed::High)
            .with_mount_point("/media/stick");
        let port = PortRecord::new("/dev/ttyUSB0")
            .with_device(stick.key())
            .with_baud_rate(115_200);
        let snapshot = Snapshot::from_records([stick], [port]);

        let mut out = Vec::new();
        render(&mut out, &snapshot).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert!(lines[0].starts_with("DEVICE"));
        assert!(lines[1].starts_with("0781:5581:4C53"));
        assert!(lines[1].contains("Cruzer"));
        assert!(lines[1].ends_with("/media/stick"));
        assert!(lines[3].starts_with("PORT"));
        assert!(lines[4].starts_with("/dev/ttyUSB0"));
        assert!(lines[4].contains("115200"));
    }
}
