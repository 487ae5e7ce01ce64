//! One module per subcommand. Human-readable output goes to stdout through
//! an explicit writer; diagnostics go through `tracing`.

mod export;
mod history;
mod list;
mod speedtest;
mod stats;
mod watch;

use crate::cli::{Cli, Command};
use config::Config;
use monitor::{Services, SqliteStore, SystemClock, provider::platform_provider};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn run(cli: &Cli, config: Config) -> anyhow::Result<()> {
    let out = io::stdout();
    match &cli.command {
        Command::Watch => {
            watch::run(config, cli.conffile.as_deref(), cli.database.as_deref()).await
        }
        Command::List { table } => list::run(&mut out.lock(), !*table).await,
        Command::History(args) => history::run(&mut out.lock(), &config, args).await,
        Command::Export { output } => export::run(&config, output.as_deref()).await,
        Command::Speedtest(args) => speedtest::run(&mut out.lock(), config, args).await,
        Command::Stats { json } => stats::run(&mut out.lock(), &config, *json).await,
    }
}

/// The configured history database, or an in-memory one that disappears with
/// the process.
pub(crate) async fn open_store(config: &Config) -> Result<Arc<SqliteStore>, monitor::Error> {
    let store = match &config.persistence.database_path {
        Some(path) => {
            debug!(path = %path.display(), "opening history database");
            SqliteStore::open(path).await?
        }
        None => {
            warn!("no database configured; history is kept in memory only");
            SqliteStore::in_memory().await?
        }
    };
    Ok(Arc::new(store))
}

pub(crate) fn services(store: Arc<SqliteStore>) -> Services {
    Services {
        provider: platform_provider(),
        store,
        clock: Box::new(SystemClock),
    }
}

pub(crate) fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |value| value.to_string())
}

pub(crate) fn flush(out: &mut impl Write) -> io::Result<()> {
    out.flush()
}
