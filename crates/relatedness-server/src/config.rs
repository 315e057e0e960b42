use anyhow::bail;
use clap::{Args, ValueEnum};
use core::time::Duration;
use relatedness::{
    DEFAULT_LEASE_SLOT, DEFAULT_LEASE_TTL, DEFAULT_MAX_ACTIVE, DEFAULT_POLL_INTERVAL, QueueConfig,
    Store, StoreConfig,
};
use std::path::PathBuf;

/// Output format of the log subscriber.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Shared-store and lease-queue arguments common to every binary.
///
/// Every worker and server pointed at the same database must agree on these
/// values; the queue's admission limit is only as strict as the most lenient
/// participant.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Path of the shared SQLite database. Created if missing.
    ///
    /// Environment variable: `DB_PATH`
    #[arg(long, env = "DB_PATH", default_value = "relatedness.db")]
    pub db_path: PathBuf,

    /// Number of concurrently active leases before samples are batched.
    ///
    /// Environment variable: `MAX_ACTIVE_LEASES`
    #[arg(long, env = "MAX_ACTIVE_LEASES", default_value_t = DEFAULT_MAX_ACTIVE)]
    pub max_active_leases: usize,

    /// Seconds after its start at which a lease stops counting as active.
    ///
    /// Must comfortably exceed the comparator's runtime, otherwise a slow
    /// worker can be overlapped by a newcomer.
    ///
    /// Environment variable: `LEASE_TTL_SECS`
    #[arg(long, env = "LEASE_TTL_SECS", default_value_t = DEFAULT_LEASE_TTL.as_secs())]
    pub lease_ttl_secs: u64,

    /// Activation offset added per lease already active.
    ///
    /// Environment variable: `LEASE_SLOT_SECS`
    #[arg(long, env = "LEASE_SLOT_SECS", default_value_t = DEFAULT_LEASE_SLOT.as_secs())]
    pub lease_slot_secs: u64,

    /// Milliseconds between polls while waiting for a turn.
    ///
    /// Environment variable: `POLL_INTERVAL_MS`
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    pub poll_interval_ms: u64,

    /// Milliseconds a writer waits on another worker's write lock.
    ///
    /// Environment variable: `BUSY_TIMEOUT_MS`
    #[arg(long, env = "BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    pub busy_timeout_ms: u64,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Validated form of [`StoreArgs`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub db_path: PathBuf,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub log_format: LogFormat,
}

impl StoreSettings {
    /// Opens the shared store, creating the schema if needed.
    pub fn open_store(&self) -> relatedness::Result<Store> {
        Store::open(&self.db_path, &self.store)
    }
}

impl TryFrom<StoreArgs> for StoreSettings {
    type Error = anyhow::Error;

    fn try_from(args: StoreArgs) -> Result<Self, Self::Error> {
        if args.max_active_leases == 0 {
            bail!("MAX_ACTIVE_LEASES must be greater than 0");
        }
        if args.lease_ttl_secs == 0 {
            bail!("LEASE_TTL_SECS must be greater than 0");
        }
        if args.poll_interval_ms == 0 {
            bail!("POLL_INTERVAL_MS must be greater than 0");
        }
        if i64::try_from(args.lease_ttl_secs).is_err() {
            bail!("LEASE_TTL_SECS ({}) is out of range", args.lease_ttl_secs);
        }

        Ok(Self {
            db_path: args.db_path,
            store: StoreConfig {
                busy_timeout: Duration::from_millis(args.busy_timeout_ms),
            },
            queue: QueueConfig {
                max_active: args.max_active_leases,
                ttl: Duration::from_secs(args.lease_ttl_secs),
                slot: Duration::from_secs(args.lease_slot_secs),
                poll_interval: Duration::from_millis(args.poll_interval_ms),
            },
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        store: StoreArgs,
    }

    fn settings(args: &[&str]) -> anyhow::Result<StoreSettings> {
        let cli = Cli::try_parse_from(std::iter::once("test").chain(args.iter().copied()))?;
        StoreSettings::try_from(cli.store)
    }

    #[test]
    fn defaults_match_the_core_constants() {
        let settings = settings(&["--db-path", "x.db"]).unwrap();
        assert_eq!(settings.queue.max_active, DEFAULT_MAX_ACTIVE);
        assert_eq!(settings.queue.ttl, DEFAULT_LEASE_TTL);
        assert_eq!(settings.queue.slot, DEFAULT_LEASE_SLOT);
        assert_eq!(settings.queue.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(settings.store.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(settings(&["--max-active-leases", "0"]).is_err());
        assert!(settings(&["--lease-ttl-secs", "0"]).is_err());
        assert!(settings(&["--poll-interval-ms", "0"]).is_err());
    }

    #[test]
    fn log_format_parses() {
        let settings = settings(&["--log-format", "json"]).unwrap();
        assert_eq!(settings.log_format, LogFormat::Json);
    }
}
