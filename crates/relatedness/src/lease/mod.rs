//! Time-bounded FIFO admission queue backed by rows in the shared store.
//!
//! A worker asks for admission with [`AdmissionQueue::acquire`]. While fewer
//! than `max_active` leases are active it gets a [`LeaseId`]; otherwise its
//! sample is diverted into the batch. Admitted workers then
//! [`wait`](AdmissionQueue::wait) until theirs is the oldest active lease,
//! do their work and release.
//!
//! A lease is active iff `start + ttl > now`. Rows of crashed workers are
//! never deleted; they simply stop counting once the TTL elapses, so a
//! holder that runs longer than the TTL can be overlapped by a newcomer.

mod guard;

pub use guard::LeaseGuard;

use crate::batch::divert_tx;
use crate::{
    Admission, Error, LeaseId, LeaseRecord, Result, Species, Store, SystemClock, TimeSource,
    validate_guid,
};
use core::time::Duration;
use rusqlite::{Connection, OptionalExtension, params};

/// Default number of concurrently active leases.
pub const DEFAULT_MAX_ACTIVE: usize = 3;
/// Default lease time-to-live.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(3600);
/// Default per-position activation offset.
pub const DEFAULT_LEASE_SLOT: Duration = Duration::from_secs(900);
/// Default interval between polls in [`AdmissionQueue::wait`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for the lease queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Active leases at which new samples are batched instead of admitted.
    pub max_active: usize,
    /// How long a lease counts as active after its start.
    pub ttl: Duration,
    /// Activation offset per lease already active, spreading starts across
    /// queue depth.
    pub slot: Duration,
    /// Sleep between polls while waiting for a turn.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            ttl: DEFAULT_LEASE_TTL,
            slot: DEFAULT_LEASE_SLOT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// The lease abstraction used by the coordinator.
///
/// Implementations must make the active-count check and the grant a single
/// atomic step in their store's transaction model.
pub trait AdmissionQueue {
    /// Requests admission for `guid`.
    ///
    /// Every grant inserts a new lease, even for a guid that already holds
    /// one; the second holder waits its turn like any other. When the queue
    /// is saturated the guid is added to the batch (at most
    /// once) and [`Admission::Batched`] is returned.
    fn acquire(&self, species: &Species, guid: &str) -> Result<Admission>;

    /// Requests an anonymous lease without diverting anything on
    /// saturation. Returns `None` when the queue is full.
    fn try_acquire(&self, species: &Species) -> Result<Option<LeaseId>>;

    /// Returns the active lease with the smallest id.
    fn peek_next(&self, species: &Species) -> Result<Option<LeaseId>>;

    /// Returns whether `lease` exists and has not outlived its TTL.
    fn is_active(&self, species: &Species, lease: LeaseId) -> Result<bool>;

    /// Deletes `lease`. Returns `false` if it did not exist.
    fn release(&self, species: &Species, lease: LeaseId) -> Result<bool>;

    /// Sleep between polls in [`Self::wait`].
    fn poll_interval(&self) -> Duration;

    /// Blocks until `lease` is the head of the queue.
    ///
    /// There is no timeout: the wait ends when every earlier lease has been
    /// released or has expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseNotActive`] if `lease` itself is released or
    /// expires while waiting, since it could then never reach the head.
    fn wait(&self, species: &Species, lease: LeaseId) -> Result<()> {
        let mut polls: u64 = 0;
        loop {
            if self.peek_next(species)? == Some(lease) {
                tracing::debug!(%species, %lease, polls, "lease reached the head of the queue");
                return Ok(());
            }
            if !self.is_active(species, lease)? {
                return Err(Error::LeaseNotActive(lease));
            }
            polls += 1;
            tracing::trace!(%species, %lease, polls, "waiting for turn");
            std::thread::sleep(self.poll_interval());
        }
    }
}

/// [`AdmissionQueue`] over the shared SQLite store.
#[derive(Debug, Clone)]
pub struct SqliteLeaseQueue<T = SystemClock> {
    store: Store,
    config: QueueConfig,
    clock: T,
}

impl SqliteLeaseQueue<SystemClock> {
    /// Creates a queue reading the system wall clock.
    pub fn new(store: Store, config: QueueConfig) -> Self {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<T: TimeSource> SqliteLeaseQueue<T> {
    /// Creates a queue driven by an explicit [`TimeSource`].
    pub fn with_clock(store: Store, config: QueueConfig, clock: T) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Lists the active leases of `species` in turn order.
    pub fn active_leases(&self, species: &Species) -> Result<Vec<LeaseRecord>> {
        let now = self.clock.current_secs();
        let ttl = self.ttl_secs();
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, guid, start FROM leases
                 WHERE species = ?1 AND start + ?2 > ?3 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![species.as_str(), ttl, now], |row| {
                Ok(LeaseRecord {
                    id: LeaseId::new(row.get(0)?),
                    guid: row.get(1)?,
                    start: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn ttl_secs(&self) -> i64 {
        self.config.ttl.as_secs() as i64
    }

    /// Inserts a lease if there is room. Must run inside a write transaction.
    fn grant(
        &self,
        conn: &Connection,
        species: &Species,
        guid: Option<&str>,
        now: i64,
    ) -> Result<Option<(LeaseId, i64)>> {
        let active = count_active(conn, species, now, self.ttl_secs())?;
        if active >= self.config.max_active {
            tracing::debug!(%species, active, "lease queue saturated");
            return Ok(None);
        }

        let start = now + active as i64 * self.config.slot.as_secs() as i64;
        conn.execute(
            "INSERT INTO leases (species, guid, start) VALUES (?1, ?2, ?3)",
            params![species.as_str(), guid, start],
        )?;
        let lease = LeaseId::new(conn.last_insert_rowid());
        tracing::debug!(%species, %lease, start, depth = active, "lease granted");
        Ok(Some((lease, start)))
    }
}

impl<T: TimeSource> AdmissionQueue for SqliteLeaseQueue<T> {
    fn acquire(&self, species: &Species, guid: &str) -> Result<Admission> {
        validate_guid(guid)?;
        let now = self.clock.current_secs();

        self.store.write(|tx| match self.grant(tx, species, Some(guid), now)? {
            Some((lease, start)) => Ok(Admission::Granted { lease, start }),
            None => {
                let added = divert_tx(tx, species, guid)?;
                tracing::info!(%species, guid, added, "queue saturated, sample batched");
                Ok(Admission::Batched)
            }
        })
    }

    fn try_acquire(&self, species: &Species) -> Result<Option<LeaseId>> {
        let now = self.clock.current_secs();
        let granted = self.store.write(|tx| self.grant(tx, species, None, now))?;
        Ok(granted.map(|(lease, _)| lease))
    }

    fn peek_next(&self, species: &Species) -> Result<Option<LeaseId>> {
        let now = self.clock.current_secs();
        let ttl = self.ttl_secs();
        self.store.read(|conn| {
            let next = conn
                .query_row(
                    "SELECT id FROM leases
                     WHERE species = ?1 AND start + ?2 > ?3 ORDER BY id ASC LIMIT 1",
                    params![species.as_str(), ttl, now],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(next.map(LeaseId::new))
        })
    }

    fn is_active(&self, species: &Species, lease: LeaseId) -> Result<bool> {
        let now = self.clock.current_secs();
        let ttl = self.ttl_secs();
        self.store.read(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM leases
                 WHERE species = ?1 AND id = ?2 AND start + ?3 > ?4)",
                params![species.as_str(), lease.get(), ttl, now],
                |row| row.get(0),
            )?)
        })
    }

    fn release(&self, species: &Species, lease: LeaseId) -> Result<bool> {
        let removed = self.store.write(|tx| {
            Ok(tx.execute(
                "DELETE FROM leases WHERE species = ?1 AND id = ?2",
                params![species.as_str(), lease.get()],
            )?)
        })?;
        if removed == 0 {
            tracing::warn!(%species, %lease, "release of unknown lease ignored");
            return Ok(false);
        }
        tracing::debug!(%species, %lease, "lease released");
        Ok(true)
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }
}

fn count_active(conn: &Connection, species: &Species, now: i64, ttl: i64) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM leases WHERE species = ?1 AND start + ?2 > ?3",
        params![species.as_str(), ttl, now],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
