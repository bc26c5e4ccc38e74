//! Command line of `wxd`

use chrono::DateTime;
use clap::{Parser, Subcommand};
use wx_core::Timestamp;

/// Weather station ingestion.
///
/// Without a subcommand, runs one ingestion cycle and exits.
#[derive(Parser, Debug)]
#[command(name = "wxd", version, about = "Weather station ingestion")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run one ingestion cycle (the default)
    Run,

    /// Rescale implausible stored pressure readings and rebuild the
    /// 3-hour buckets of the repaired window
    Repair {
        /// Window start, epoch seconds or RFC 3339 (default: beginning of time)
        #[arg(long, value_parser = parse_instant)]
        since: Option<Timestamp>,

        /// Window end, epoch seconds or RFC 3339 (default: now)
        #[arg(long, value_parser = parse_instant)]
        until: Option<Timestamp>,
    },
}

fn parse_instant(value: &str) -> Result<Timestamp, String> {
    if let Ok(epoch) = value.parse::<Timestamp>() {
        return Ok(epoch);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .map_err(|_| format!("expected epoch seconds or RFC 3339, got {value:?}"))
}
