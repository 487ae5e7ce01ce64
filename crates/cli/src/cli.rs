use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};

/// usbwatch: USB device and serial port monitor
///
/// Polls attached USB devices and serial ports, records every connection,
/// disconnection and attribute change in a local history database, and runs
/// throughput tests against mounted storage devices.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_parser = validate_file)]
    pub conffile: Option<PathBuf>,

    /// History database. Overrides `persistence.database_path`.
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Path to log file.
    ///
    /// Logs go to stderr when omitted.
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the monitoring loop until interrupted.
    ///
    /// SIGUSR1 forces a rescan, SIGUSR2 logs the loop status and SIGHUP
    /// reloads the configuration file.
    Watch,

    /// Print what is attached right now, as JSON.
    List {
        /// Print a table instead.
        #[arg(long)]
        table: bool,
    },

    /// Print stored connection events.
    History(HistoryArgs),

    /// Write the whole history as JSON.
    Export {
        /// Destination file. Writes to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Measure write and read throughput.
    Speedtest(SpeedtestArgs),

    /// Print device and port counts from the history.
    Stats {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args, Clone)]
pub struct HistoryArgs {
    /// Only events for this device key (`vvvv:pppp[:serial]`).
    #[arg(long, value_parser = validate_key, conflicts_with = "port")]
    pub device: Option<String>,

    /// Only events for this port name.
    #[arg(long)]
    pub port: Option<String>,

    /// Start of the time range (RFC 3339).
    #[arg(long, value_parser = parse_time)]
    pub since: Option<DateTime<Utc>>,

    /// End of the time range (RFC 3339).
    #[arg(long, value_parser = parse_time)]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Args, Clone)]
pub struct SpeedtestArgs {
    /// Tracked device key (`vvvv:pppp[:serial]`). The result is rated and
    /// stored.
    #[arg(long, value_parser = validate_key)]
    #[arg(required_unless_present = "path", conflicts_with = "path")]
    pub device: Option<String>,

    /// Any writable directory. The result is printed only.
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Bytes to write and read back, e.g. `64MB` or `512KiB`.
    #[arg(long, value_parser = parse_size)]
    pub size: Option<u64>,
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

/// Device keys are `vvvv:pppp` with an optional `:serial` suffix, ids in hex.
fn validate_key(key: &str) -> Result<String, String> {
    let mut parts = key.splitn(3, ':');
    let ids = [parts.next(), parts.next()];
    let valid = ids
        .iter()
        .all(|id| id.is_some_and(|id| id.len() == 4 && u16::from_str_radix(id, 16).is_ok()));
    if !valid {
        return Err(format!("`{key}` is not a device key (expected vvvv:pppp[:serial])"));
    }
    if parts.next().is_some_and(str::is_empty) {
        return Err(format!("`{key}` has an empty serial"));
    }
    // Ids are lowercase in stored keys; the serial is kept as typed.
    Ok(match key.match_indices(':').nth(1) {
        Some((split, _)) => format!("{}{}", key[..split].to_ascii_lowercase(), &key[split..]),
        None => key.to_ascii_lowercase(),
    })
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| format!("`{raw}` is not an RFC 3339 timestamp: {err}"))
}

/// Byte counts with an optional decimal (`KB`, `MB`, `GB`) or binary (`KiB`,
/// `MiB`, `GiB`) suffix.
pub fn parse_size(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("`{raw}` is not a byte count"))?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KB" | "kB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        other => return Err(format!("unknown size unit `{other}`")),
    };
    match value.checked_mul(multiplier) {
        Some(0) => Err("size must be greater than zero".to_string()),
        Some(bytes) => Ok(bytes),
        None => Err(format!("`{raw}` is too large")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn sizes_with_units() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("64MB").unwrap(), 64_000_000);
        assert_eq!(parse_size("512KiB").unwrap(), 512 * 1024);
        assert_eq!(parse_size("1 GiB").unwrap(), 1 << 30);
        assert!(parse_size("0").is_err());
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("MB").is_err());
    }

    #[test]
    fn device_keys() {
        assert_eq!(validate_key("0781:5581").unwrap(), "0781:5581");
        assert_eq!(validate_key("046D:C52B:AbC").unwrap(), "046d:c52b:AbC");
        assert!(validate_key("781:5581").is_err());
        assert!(validate_key("0781").is_err());
        assert!(validate_key("0781:zzzz").is_err());
        assert!(validate_key("0781:5581:").is_err());
    }

    #[test]
    fn speedtest_needs_exactly_one_target() {
        let parsed = Cli::try_parse_from(["usbwatch", "speedtest", "--path", "/tmp"]).unwrap();
        assert!(matches!(parsed.command, Command::Speedtest(SpeedtestArgs { path: Some(_), .. })));
        assert!(Cli::try_parse_from(["usbwatch", "speedtest"]).is_err());
        assert!(
            Cli::try_parse_from([
                "usbwatch", "speedtest", "--path", "/tmp", "--device", "0781:5581"
            ])
            .is_err()
        );
    }

    #[test]
    fn history_time_range() {
        let parsed = Cli::try_parse_from([
            "usbwatch",
            "history",
            "--since",
            "2025-03-01T10:00:00+01:00",
        ])
        .unwrap();
        let Command::History(args) = parsed.command else {
            panic!("expected history");
        };
        assert_eq!(
            args.since.unwrap().to_rfc3339(),
            "2025-03-01T09:00:00+00:00"
        );
        assert_eq!(args.until, None);
    }

    proptest! {
        #[test]
        fn plain_counts_parse_verbatim(bytes in 1u64..=u64::MAX / 2) {
            prop_assert_eq!(parse_size(&bytes.to_string()).unwrap(), bytes);
        }

        #[test]
        fn mebibytes_scale(count in 1u64..1_000_000) {
            prop_assert_eq!(parse_size(&format!("{count}MiB")).unwrap(), count << 20);
        }
    }
}
