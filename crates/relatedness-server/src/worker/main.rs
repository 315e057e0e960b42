//! # `relatedness-worker`
//!
//! Processes one sample, or the whole batch, under the shared lease queue.
//!
//! ## Usage
//!
//! ```bash
//! relatedness-worker --species tb --comparator ./fast-snp \
//!     --guid sample-1 --path sample-1.fasta --reference h37rv.fasta
//! ```
//!
//! ```bash
//! relatedness-worker --species tb --comparator ./fast-snp \
//!     --drain-batch --samples-dir /data/fasta --reference h37rv.fasta
//! ```

use clap::Parser;
use relatedness::{DrainOutcome, RunOutcome};
use relatedness_server::telemetry::init_tracing;
use relatedness_server::worker::config::{CliArgs, WorkerConfig};
use relatedness_server::worker::{WorkerOutcome, run};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = WorkerConfig::try_from(args)?;

    init_tracing(config.settings.log_format)?;
    tracing::info!(species = %config.species, db = %config.settings.db_path.display(), "worker starting");

    match run(&config)? {
        WorkerOutcome::Run(report) => match report.outcome {
            RunOutcome::Batched => tracing::info!("queue saturated, sample batched for later"),
            RunOutcome::Completed { lease, commit } => tracing::info!(
                %lease,
                inserted = commit.inserted,
                skipped = commit.skipped,
                neighbors_updated = commit.neighbors_updated,
                "sample committed"
            ),
        },
        WorkerOutcome::Drain(DrainOutcome::Empty) => tracing::info!("batch is empty"),
        WorkerOutcome::Drain(DrainOutcome::Saturated) => {
            tracing::info!("queue saturated, drain postponed")
        }
        WorkerOutcome::Drain(DrainOutcome::Drained {
            lease,
            samples,
            commit,
        }) => tracing::info!(
            %lease,
            samples = samples.len(),
            inserted = commit.inserted,
            neighbors_updated = commit.neighbors_updated,
            "batch drained"
        ),
    }
    Ok(())
}
