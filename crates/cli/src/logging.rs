use crate::error::Error;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. `RUST_LOG` wins over the verbosity flags.
///
/// With a log file, records go through a non-blocking writer whose guard
/// must live until the process exits, or buffered lines are dropped.
pub fn init(level: LevelFilter, logfile: Option<&Path>) -> Result<Option<WorkerGuard>, Error> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    match logfile {
        Some(path) => {
            let (dir, file) = split(path)?;
            std::fs::create_dir_all(dir).map_err(|source| Error::LogFile {
                path: path.to_path_buf(),
                source,
            })?;
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_file(true)
                        .with_line_number(true),
                )
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_level(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .try_init()?;
            Ok(None)
        }
    }
}

fn split(path: &Path) -> Result<(&Path, &std::ffi::OsStr), Error> {
    let file = path.file_name().ok_or_else(|| Error::LogFile {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"),
    })?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok((dir, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bare_file_name_logs_to_cwd() {
        let (dir, file) = split(Path::new("usbwatch.log")).unwrap();
        assert_eq!(dir, Path::new("."));
        assert_eq!(file, "usbwatch.log");
    }

    #[test]
    fn directory_is_rejected() {
        assert!(split(Path::new("/")).is_err());
    }
}
