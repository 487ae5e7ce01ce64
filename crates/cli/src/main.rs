use clap::Parser;
use config::Config;
use tracing::debug;
use tracing_log::AsTrace;
use usbwatch::{cli::Cli, commands, logging};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(
        cli.verbosity.log_level_filter().as_trace(),
        cli.logfile.as_deref(),
    )?;

    debug!(config = ?cli);

    let mut config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        _ => Config::new(),
    };
    if let Some(database) = &cli.database {
        config.persistence.database_path = Some(database.clone());
    }

    commands::run(&cli, config).await
}
