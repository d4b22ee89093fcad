use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "coral-db")]
#[command(about = "An embeddable Redis-compatible in-memory data store")]
#[command(long_about = "coral-db serves typed values over the Redis protocol and keeps them durable with periodic snapshots plus an append-only command log")]
#[command(version)]
pub struct Cli {
    /// Server host to bind to
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Server port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Configuration file path (JSON format)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Snapshot file
    #[arg(long)]
    pub rdb_file: Option<PathBuf>,

    /// Append-only log file
    #[arg(long)]
    pub aof_file: Option<PathBuf>,

    /// Seconds between snapshots
    #[arg(long)]
    pub sync_period: Option<u64>,

    /// Publish keyspace notifications for every successful write
    #[arg(long)]
    pub notify_keyspace_events: bool,

    /// Serve from memory only, without snapshots or the append-only log
    #[arg(long)]
    pub no_persistence: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Maximum log level selected by the verbosity flags.
    pub fn log_level(&self) -> tracing::Level {
        if self.debug {
            tracing::Level::TRACE
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = <Cli as Parser>::try_parse_from([
            "coral-db",
            "--port",
            "7000",
            "--rdb-file",
            "/tmp/x.rdb",
            "--sync-period",
            "5",
            "--no-persistence",
            "--notify-keyspace-events",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(7000));
        assert_eq!(cli.rdb_file, Some(PathBuf::from("/tmp/x.rdb")));
        assert_eq!(cli.sync_period, Some(5));
        assert!(cli.no_persistence);
        assert!(cli.notify_keyspace_events);
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_default_log_level() {
        let cli = <Cli as Parser>::try_parse_from(["coral-db"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::INFO);
        assert!(cli.host.is_none());
    }
}
