//! Worker side: one admitted run against the shared store.
//!
//! ## Submodules
//!
//! - [`config`] - CLI arguments and validated worker configuration.

pub mod config;

use config::{WorkerConfig, WorkerMode};
use relatedness::{Coordinator, DrainOutcome, RunReport, SqliteLeaseQueue};

#[derive(Debug)]
pub enum WorkerOutcome {
    Run(RunReport),
    Drain(DrainOutcome),
}

/// Opens the store and drives one run or drain through the coordinator.
///
/// # Errors
///
/// Returns any store or configuration failure, or the
/// [`relatedness::Error::RunFailed`] of a failed run. The lease is already
/// released when this returns.
pub fn run(config: &WorkerConfig) -> anyhow::Result<WorkerOutcome> {
    let store = config.settings.open_store()?;
    let queue = SqliteLeaseQueue::new(store.clone(), config.settings.queue.clone());
    let coordinator = Coordinator::new(
        queue,
        config.comparator(),
        store,
        config.coordinator.clone(),
    );

    let outcome = match &config.mode {
        WorkerMode::Single(job) => WorkerOutcome::Run(coordinator.run(&config.species, job)?),
        WorkerMode::Drain(source) => WorkerOutcome::Drain(
            coordinator.drain_batch(&config.species, |guid| source.describe(guid))?,
        ),
    };
    Ok(outcome)
}
