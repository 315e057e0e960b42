//! Drives one worker run: acquire a lease, wait for the turn, run the
//! comparator, commit, release.
//!
//! The lease is held by a [`LeaseGuard`], so it is released on every exit
//! path. Errors after admission surface as [`Error::RunFailed`] carrying the
//! stage that failed, and only once the lease is gone.
//!
//! A worker whose run outlives the lease TTL may be overlapped by a newcomer
//! and its commit then races the newcomer's. Each commit is a single
//! transaction, so neither is torn, but the TTL must comfortably exceed the
//! comparator's runtime.

use crate::batch::clear_tx;
use crate::distance::insert_many_tx;
use crate::neighbor::observe_many_tx;
use crate::{
    Admission, AdmissionQueue, Comparator, Comparison, Error, LeaseGuard, LeaseId, Result,
    SampleDescriptor, Species, Store,
};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Largest distance written to the distance store by default. Larger
/// distances still feed the nearest-neighbour tracker.
pub const DEFAULT_MAX_STORED_DISTANCE: i64 = 20;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Distances above this are not stored. `None` stores everything.
    /// Orphan and QC-failure records are always stored.
    pub max_stored_distance: Option<i64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_stored_distance: Some(DEFAULT_MAX_STORED_DISTANCE),
        }
    }
}

/// A sample to process and the descriptors handed to the comparator.
#[derive(Debug, Clone)]
pub struct Job {
    /// The sample that owns the lease.
    pub guid: String,
    pub samples: Vec<SampleDescriptor>,
}

/// Stages of a coordinated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    LeaseRequested,
    Waiting,
    Running,
    Committing,
    Released,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::LeaseRequested => "requesting a lease",
            Self::Waiting => "waiting for the lease",
            Self::Running => "running the comparator",
            Self::Committing => "committing",
            Self::Released => "releasing the lease",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a commit wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub inserted: usize,
    pub skipped: usize,
    pub neighbors_updated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The queue was saturated and the sample went to the batch.
    Batched,
    Completed { lease: LeaseId, commit: CommitReport },
}

/// Result of [`Coordinator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Every stage entered, in order.
    pub transitions: Vec<RunState>,
}

/// Result of [`Coordinator::drain_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was batched.
    Empty,
    /// No lease was free; the batch is untouched.
    Saturated,
    Drained {
        lease: LeaseId,
        /// The guids removed from the batch.
        samples: Vec<String>,
        commit: CommitReport,
    },
}

#[derive(Debug, Default)]
struct Progress {
    transitions: Vec<RunState>,
}

impl Progress {
    fn enter(&mut self, state: RunState) {
        tracing::debug!(%state, "run stage");
        self.transitions.push(state);
    }

    fn current(&self) -> RunState {
        self.transitions.last().copied().unwrap_or(RunState::Idle)
    }
}

/// Runs jobs through the admission queue and commits their results.
#[derive(Debug)]
pub struct Coordinator<Q, C> {
    queue: Q,
    comparator: C,
    store: Store,
    config: CoordinatorConfig,
}

impl<Q: AdmissionQueue, C: Comparator> Coordinator<Q, C> {
    /// `store` receives the commits and must be the store `queue` leases
    /// from, or one opened on the same file.
    pub fn new(queue: Q, comparator: C, store: Store, config: CoordinatorConfig) -> Self {
        Self {
            queue,
            comparator,
            store,
            config,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Processes one sample.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunFailed`] naming the failed stage. The lease, if one
    /// was granted, has been released by then. A release that fails after a
    /// successful commit is logged, not returned.
    #[tracing::instrument(skip_all, fields(%species, guid = %job.guid))]
    pub fn run(&self, species: &Species, job: &Job) -> Result<RunReport> {
        let mut progress = Progress::default();
        progress.enter(RunState::Idle);
        progress.enter(RunState::LeaseRequested);

        let lease = match self.queue.acquire(species, &job.guid) {
            Ok(Admission::Granted { lease, .. }) => lease,
            Ok(Admission::Batched) => {
                tracing::info!("queue saturated, sample batched");
                return Ok(RunReport {
                    outcome: RunOutcome::Batched,
                    transitions: progress.transitions,
                });
            }
            Err(e) => return Err(fail(RunState::LeaseRequested, e)),
        };
        tracing::info!(%lease, "lease granted");

        let guard = LeaseGuard::new(&self.queue, species.clone(), lease);
        let result = self.admitted(&guard, &job.samples, None, &mut progress);
        let commit = self.finish(guard, result, &mut progress)?;

        Ok(RunReport {
            outcome: RunOutcome::Completed { lease, commit },
            transitions: progress.transitions,
        })
    }

    /// Processes every batched sample in one admitted run.
    ///
    /// `describe` maps a batched guid to its comparator descriptor. The
    /// drained guids are removed from the batch in the commit transaction,
    /// so a failed drain leaves the batch intact.
    #[tracing::instrument(skip_all, fields(%species))]
    pub fn drain_batch<F>(&self, species: &Species, describe: F) -> Result<DrainOutcome>
    where
        F: Fn(&str) -> SampleDescriptor,
    {
        let batched = crate::BatchSet::new(self.store.clone()).list(species)?;
        if batched.is_empty() {
            return Ok(DrainOutcome::Empty);
        }

        let mut progress = Progress::default();
        progress.enter(RunState::LeaseRequested);
        let Some(lease) = self
            .queue
            .try_acquire(species)
            .map_err(|e| fail(RunState::LeaseRequested, e))?
        else {
            tracing::info!(batched = batched.len(), "queue saturated, drain postponed");
            return Ok(DrainOutcome::Saturated);
        };
        tracing::info!(%lease, batched = batched.len(), "draining batch");

        let samples: Vec<SampleDescriptor> = batched.iter().map(|g| describe(g.as_str())).collect();
        let guard = LeaseGuard::new(&self.queue, species.clone(), lease);
        let result = self.admitted(&guard, &samples, Some(batched.as_slice()), &mut progress);
        let commit = self.finish(guard, result, &mut progress)?;

        Ok(DrainOutcome::Drained {
            lease,
            samples: batched,
            commit,
        })
    }

    fn admitted(
        &self,
        guard: &LeaseGuard<'_, Q>,
        samples: &[SampleDescriptor],
        drained: Option<&[String]>,
        progress: &mut Progress,
    ) -> Result<CommitReport> {
        progress.enter(RunState::Waiting);
        guard.wait()?;

        progress.enter(RunState::Running);
        let comparisons = self.comparator.compare(samples)?;

        progress.enter(RunState::Committing);
        self.commit(guard.species(), &comparisons, drained)
    }

    fn finish(
        &self,
        guard: LeaseGuard<'_, Q>,
        result: Result<CommitReport>,
        progress: &mut Progress,
    ) -> Result<CommitReport> {
        match result {
            Ok(commit) => {
                progress.enter(RunState::Released);
                // The commit is durable; a lost release is left to TTL expiry.
                if let Err(release) = guard.release() {
                    tracing::error!("failed to release lease after commit: {release}");
                }
                tracing::info!(
                    inserted = commit.inserted,
                    skipped = commit.skipped,
                    neighbors_updated = commit.neighbors_updated,
                    "run complete"
                );
                Ok(commit)
            }
            Err(e) => {
                let stage = progress.current();
                progress.enter(RunState::Failed);
                if let Err(release) = guard.release() {
                    tracing::error!("failed to release lease after failure: {release}");
                }
                progress.enter(RunState::Released);
                tracing::warn!(%stage, "run failed: {e}");
                Err(fail(stage, e))
            }
        }
    }

    /// Writes distances and neighbour updates, and clears `drained` from the
    /// batch, all in one transaction.
    fn commit(
        &self,
        species: &Species,
        comparisons: &[Comparison],
        drained: Option<&[String]>,
    ) -> Result<CommitReport> {
        for c in comparisons {
            c.validate()?;
        }
        let stored: Vec<Comparison> = comparisons
            .iter()
            .filter(|c| self.is_stored(c))
            .cloned()
            .collect();

        self.store.write(|tx| {
            let inserted = insert_many_tx(tx, species, &stored)?;
            let neighbors_updated = observe_many_tx(tx, species, comparisons)?;
            if let Some(drained) = drained {
                clear_tx(tx, species, drained)?;
            }
            Ok(CommitReport {
                inserted: inserted.inserted,
                skipped: inserted.skipped,
                neighbors_updated,
            })
        })
    }

    fn is_stored(&self, c: &Comparison) -> bool {
        !c.is_distance() || self.config.max_stored_distance.is_none_or(|max| c.dist <= max)
    }
}

fn fail(stage: RunState, source: Error) -> Error {
    Error::RunFailed {
        stage,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BatchSet, ComparatorError, DistanceStore, NeighborQuery, NeighborTracker, QueueConfig,
        SqliteLeaseQueue, StoreConfig,
    };
    use core::sync::atomic::{AtomicUsize, Ordering};
    use core::time::Duration;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Returns a fixed result and counts its invocations.
    struct FixedComparator {
        result: fn() -> core::result::Result<Vec<Comparison>, ComparatorError>,
        calls: AtomicUsize,
    }

    impl FixedComparator {
        fn new(result: fn() -> core::result::Result<Vec<Comparison>, ComparatorError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Comparator for FixedComparator {
        fn compare(
            &self,
            _samples: &[SampleDescriptor],
        ) -> core::result::Result<Vec<Comparison>, ComparatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn descriptor(guid: &str) -> SampleDescriptor {
        SampleDescriptor {
            guid: guid.to_string(),
            path: PathBuf::from(format!("{guid}.fasta")),
            reference: PathBuf::from("ref.fasta"),
            mask: None,
        }
    }

    fn job(guid: &str) -> Job {
        Job {
            guid: guid.to_string(),
            samples: vec![descriptor(guid)],
        }
    }

    fn coordinator(
        result: fn() -> core::result::Result<Vec<Comparison>, ComparatorError>,
        config: CoordinatorConfig,
    ) -> (Coordinator<SqliteLeaseQueue, FixedComparator>, Species) {
        let store = Store::open_in_memory().unwrap();
        let queue = SqliteLeaseQueue::new(
            store.clone(),
            QueueConfig {
                poll_interval: Duration::from_millis(5),
                ..QueueConfig::default()
            },
        );
        let coordinator =
            Coordinator::new(queue, FixedComparator::new(result), store, config);
        (coordinator, Species::new("tb").unwrap())
    }

    fn s1_results() -> core::result::Result<Vec<Comparison>, ComparatorError> {
        Ok(vec![
            Comparison::new("s1", "s2", 3),
            Comparison::new("s3", "s1", 25),
        ])
    }

    #[test]
    fn completed_run_commits_and_releases() {
        let (coordinator, species) = coordinator(s1_results, CoordinatorConfig::default());

        let report = coordinator.run(&species, &job("s1")).unwrap();

        let RunOutcome::Completed { commit, .. } = report.outcome else {
            panic!("expected a completed run, got {:?}", report.outcome);
        };
        assert_eq!(
            commit,
            CommitReport {
                inserted: 1,
                skipped: 0,
                neighbors_updated: 3,
            }
        );
        assert_eq!(
            report.transitions,
            vec![
                RunState::Idle,
                RunState::LeaseRequested,
                RunState::Waiting,
                RunState::Running,
                RunState::Committing,
                RunState::Released,
            ]
        );
        assert_eq!(coordinator.queue().peek_next(&species).unwrap(), None);

        // The distance above the cutoff is not stored but still counts as a
        // neighbour.
        let distances = DistanceStore::new(coordinator.store().clone());
        assert_eq!(distances.query_neighbors(&species, "s3").unwrap(), NeighborQuery::NotFound);
        let tracker = NeighborTracker::new(coordinator.store().clone());
        assert_eq!(tracker.nearest(&species, "s3").unwrap().unwrap().dist, 25);
    }

    #[test]
    fn unlimited_cutoff_stores_everything() {
        let (coordinator, species) = coordinator(
            s1_results,
            CoordinatorConfig {
                max_stored_distance: None,
            },
        );

        coordinator.run(&species, &job("s1")).unwrap();

        let distances = DistanceStore::new(coordinator.store().clone());
        assert_eq!(distances.count(&species).unwrap(), 2);
    }

    #[test]
    fn sentinels_are_stored_regardless_of_cutoff() {
        let (coordinator, species) = coordinator(
            || Ok(vec![Comparison::orphan("s1"), Comparison::qc_fail("s2")]),
            CoordinatorConfig::default(),
        );

        coordinator.run(&species, &job("s1")).unwrap();

        let distances = DistanceStore::new(coordinator.store().clone());
        assert_eq!(
            distances.query_neighbors(&species, "s1").unwrap(),
            NeighborQuery::Found(Default::default())
        );
        assert_eq!(distances.query_neighbors(&species, "s2").unwrap(), NeighborQuery::QcFail);
    }

    #[test]
    fn comparator_failure_releases_the_lease() {
        let (coordinator, species) = coordinator(
            || {
                Err(ComparatorError::Output {
                    line: 1,
                    reason: "garbage".into(),
                })
            },
            CoordinatorConfig::default(),
        );

        let err = coordinator.run(&species, &job("s1")).unwrap_err();

        assert!(matches!(
            err,
            Error::RunFailed {
                stage: RunState::Running,
                ..
            }
        ));
        assert!(matches!(err.root(), Error::Comparator(_)));
        assert_eq!(coordinator.queue().peek_next(&species).unwrap(), None);
    }

    #[test]
    fn invalid_output_fails_in_commit_and_writes_nothing() {
        let (coordinator, species) = coordinator(
            || Ok(vec![Comparison::new("s1", "s2", 1), Comparison::new("bad guid", "s1", 2)]),
            CoordinatorConfig::default(),
        );

        let err = coordinator.run(&species, &job("s1")).unwrap_err();

        assert!(matches!(
            err,
            Error::RunFailed {
                stage: RunState::Committing,
                ..
            }
        ));
        assert_eq!(DistanceStore::new(coordinator.store().clone()).count(&species).unwrap(), 0);
        assert_eq!(coordinator.queue().peek_next(&species).unwrap(), None);
    }

    #[test]
    fn saturated_run_is_batched_without_comparing() {
        let (coordinator, species) = coordinator(s1_results, CoordinatorConfig::default());
        for _ in 0..3 {
            coordinator.queue().try_acquire(&species).unwrap().unwrap();
        }

        let report = coordinator.run(&species, &job("s9")).unwrap();

        assert_eq!(report.outcome, RunOutcome::Batched);
        assert_eq!(coordinator.comparator().calls(), 0);
        let batch = BatchSet::new(coordinator.store().clone());
        assert_eq!(batch.list(&species).unwrap(), vec!["s9".to_string()]);
    }

    #[test]
    fn drain_processes_and_clears_the_batch() {
        let (coordinator, species) = coordinator(
            || Ok(vec![Comparison::new("s5", "s6", 2)]),
            CoordinatorConfig::default(),
        );
        let batch = BatchSet::new(coordinator.store().clone());
        batch.divert(&species, "s6").unwrap();
        batch.divert(&species, "s5").unwrap();

        let outcome = coordinator.drain_batch(&species, descriptor).unwrap();

        let DrainOutcome::Drained { samples, commit, .. } = outcome else {
            panic!("expected a drain, got {outcome:?}");
        };
        assert_eq!(samples, vec!["s5".to_string(), "s6".to_string()]);
        assert_eq!(commit.inserted, 1);
        assert!(batch.list(&species).unwrap().is_empty());
        assert_eq!(coordinator.queue().peek_next(&species).unwrap(), None);
    }

    #[test]
    fn failed_drain_keeps_the_batch() {
        let (coordinator, species) = coordinator(
            || Err(ComparatorError::Io(std::io::Error::other("gone"))),
            CoordinatorConfig::default(),
        );
        let batch = BatchSet::new(coordinator.store().clone());
        batch.divert(&species, "s5").unwrap();

        assert!(coordinator.drain_batch(&species, descriptor).is_err());
        assert_eq!(batch.list(&species).unwrap(), vec!["s5".to_string()]);
        assert_eq!(coordinator.queue().peek_next(&species).unwrap(), None);
    }

    #[test]
    fn drain_of_empty_or_saturated_queue_does_nothing() {
        let (coordinator, species) = coordinator(s1_results, CoordinatorConfig::default());
        assert_eq!(
            coordinator.drain_batch(&species, descriptor).unwrap(),
            DrainOutcome::Empty
        );

        BatchSet::new(coordinator.store().clone())
            .divert(&species, "s5")
            .unwrap();
        for _ in 0..3 {
            coordinator.queue().try_acquire(&species).unwrap().unwrap();
        }
        assert_eq!(
            coordinator.drain_batch(&species, descriptor).unwrap(),
            DrainOutcome::Saturated
        );
        assert_eq!(coordinator.comparator().calls(), 0);
    }

    /// Tracks how many comparisons run at once across coordinators.
    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    struct SlowComparator(Arc<InFlight>);

    impl Comparator for SlowComparator {
        fn compare(
            &self,
            samples: &[SampleDescriptor],
        ) -> core::result::Result<Vec<Comparison>, ComparatorError> {
            let now = self.0.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            self.0.current.fetch_sub(1, Ordering::SeqCst);
            Ok(samples
                .iter()
                .map(|s| Comparison::new(s.guid.clone(), "s2", 3))
                .collect())
        }
    }

    #[test]
    fn same_guid_runs_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relatedness.db");
        let store_config = StoreConfig {
            busy_timeout: Duration::from_secs(30),
        };
        Store::open(&path, &store_config).unwrap();
        let species = Species::new("tb").unwrap();
        let in_flight = Arc::new(InFlight::default());

        let (path, store_config, species) = (&path, &store_config, &species);
        let outcomes: Vec<RunOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let in_flight = Arc::clone(&in_flight);
                    s.spawn(move || {
                        let store = Store::open(path, store_config).unwrap();
                        let queue = SqliteLeaseQueue::new(
                            store.clone(),
                            QueueConfig {
                                poll_interval: Duration::from_millis(5),
                                ..QueueConfig::default()
                            },
                        );
                        let coordinator = Coordinator::new(
                            queue,
                            SlowComparator(in_flight),
                            store,
                            CoordinatorConfig::default(),
                        );
                        coordinator.run(species, &job("s1")).unwrap().outcome
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let leases: Vec<LeaseId> = outcomes
            .iter()
            .map(|outcome| match outcome {
                RunOutcome::Completed { lease, .. } => *lease,
                RunOutcome::Batched => panic!("nothing should be batched below capacity"),
            })
            .collect();
        assert_ne!(leases[0], leases[1]);
        assert_eq!(in_flight.peak.load(Ordering::SeqCst), 1);

        let queue = SqliteLeaseQueue::new(
            Store::open(path, store_config).unwrap(),
            QueueConfig::default(),
        );
        assert!(queue.active_leases(species).unwrap().is_empty());
    }

    /// Delegates to a real queue but fails every release.
    struct StuckRelease(SqliteLeaseQueue);

    impl AdmissionQueue for StuckRelease {
        fn acquire(&self, species: &Species, guid: &str) -> Result<Admission> {
            self.0.acquire(species, guid)
        }

        fn try_acquire(&self, species: &Species) -> Result<Option<LeaseId>> {
            self.0.try_acquire(species)
        }

        fn peek_next(&self, species: &Species) -> Result<Option<LeaseId>> {
            self.0.peek_next(species)
        }

        fn is_active(&self, species: &Species, lease: LeaseId) -> Result<bool> {
            self.0.is_active(species, lease)
        }

        fn release(&self, _species: &Species, lease: LeaseId) -> Result<bool> {
            Err(Error::LeaseNotActive(lease))
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(5)
        }
    }

    #[test]
    fn failed_release_after_commit_still_reports_the_commit() {
        let store = Store::open_in_memory().unwrap();
        let queue = StuckRelease(SqliteLeaseQueue::new(store.clone(), QueueConfig::default()));
        let coordinator = Coordinator::new(
            queue,
            FixedComparator::new(s1_results),
            store.clone(),
            CoordinatorConfig::default(),
        );
        let species = Species::new("tb").unwrap();

        let report = coordinator.run(&species, &job("s1")).unwrap();

        let RunOutcome::Completed { commit, .. } = report.outcome else {
            panic!("expected a completed run, got {:?}", report.outcome);
        };
        assert_eq!(commit.inserted, 1);
        assert_eq!(report.transitions.last(), Some(&RunState::Released));
        assert_eq!(DistanceStore::new(store).count(&species).unwrap(), 1);
    }
}
