//! Shared SQLite store.
//!
//! Every worker opens its own [`Store`] on the same database file. The rows
//! in that file are the only coordination medium between workers: there is
//! no shared memory and no in-process lock that spans processes.
//!
//! # Schema
//!
//! A single schema serves every tenant; each table carries a `species`
//! column that is part of its key.
//!
//! - `leases`: `(id INTEGER PRIMARY KEY AUTOINCREMENT, species, guid, start)`
//! - `batch`: `(species, guid)` primary key
//! - `distances`: `(species, guid1, guid2, dist)` keyed on the canonical pair
//! - `nearest`: `(species, guid, closest, dist)` keyed on the sample

use crate::Result;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS leases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    species TEXT NOT NULL,
    guid TEXT,
    start INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_leases_species ON leases (species, id);
CREATE TABLE IF NOT EXISTS batch (
    species TEXT NOT NULL,
    guid TEXT NOT NULL,
    PRIMARY KEY (species, guid)
);
CREATE TABLE IF NOT EXISTS distances (
    species TEXT NOT NULL,
    guid1 TEXT NOT NULL,
    guid2 TEXT NOT NULL,
    dist INTEGER NOT NULL,
    PRIMARY KEY (species, guid1, guid2)
);
CREATE INDEX IF NOT EXISTS idx_distances_guid2 ON distances (species, guid2);
CREATE TABLE IF NOT EXISTS nearest (
    species TEXT NOT NULL,
    guid TEXT NOT NULL,
    closest TEXT NOT NULL,
    dist INTEGER NOT NULL,
    PRIMARY KEY (species, guid)
);
";

/// Connection settings for the shared store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a writer waits on another worker's write lock before
    /// failing with `SQLITE_BUSY`.
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the shared relational store.
///
/// Cloning is cheap and shares one underlying connection; open a second
/// `Store` on the same path to act as an independent worker.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens (creating if needed) the store at `path` and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if the file cannot be
    /// opened or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        tracing::debug!(path = %path.display(), "opened shared store");
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Opens a private in-memory store. Useful for tests and single-process
    /// deployments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if the schema cannot be
    /// created.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// The backing file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Runs `f` inside one `BEGIN IMMEDIATE` transaction and commits it.
    ///
    /// The write lock is taken before `f` reads anything, so a read followed
    /// by a dependent write inside `f` cannot interleave with another
    /// worker's. If `f` fails the transaction is rolled back on drop.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R>) -> Result<R> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Runs a read-only closure against the connection.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

impl core::fmt::Debug for Store {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}
