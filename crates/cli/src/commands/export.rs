use super::open_store;
use config::Config;
use monitor::EventStore;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

pub(super) async fn run(config: &Config, output: Option<&Path>) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let export = store.export().await?;
    store.close().await;

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    if config.persistence.export_pretty {
        serde_json::to_writer_pretty(&mut writer, &export)?;
    } else {
        serde_json::to_writer(&mut writer, &export)?;
    }
    writeln!(writer)?;
    writer.flush()?;

    info!(
        devices = export.devices.len(),
        ports = export.ports.len(),
        events = export.events.len(),
        throughput = export.throughput.len(),
        output = ?output,
        "history exported"
    );
    Ok(())
}
