//! Deduplicated storage of pairwise distances.
//!
//! Pairs are unordered: `(a, b)` and `(b, a)` name the same record. Before
//! anything touches the store a [`Comparison`] is canonicalized so that the
//! lexicographically smaller guid comes first, and the store keeps exactly
//! one row per canonical pair.
//!
//! Two reserved shapes carry state rather than a distance:
//!
//! - **Orphan**: `(g, g, ORPHAN_DISTANCE)`. The sample was processed and had
//!   no neighbour within the cutoff.
//! - **QC failure**: `(g, QC_FAIL_ID, _)`. The sample failed upstream quality
//!   control.

use crate::{Error, Result, Species, Store, validate_guid};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Reserved pseudo-identifier marking a QC-failed sample.
pub const QC_FAIL_ID: &str = "||QC_FAIL||";

/// Sentinel distance of an orphan self-pair.
pub const ORPHAN_DISTANCE: i64 = -1;

/// One `(a, b, dist)` result from the comparator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comparison {
    pub a: String,
    pub b: String,
    pub dist: i64,
}

impl Comparison {
    pub fn new(a: impl Into<String>, b: impl Into<String>, dist: i64) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            dist,
        }
    }

    /// The orphan record for `guid`.
    pub fn orphan(guid: impl Into<String>) -> Self {
        let guid = guid.into();
        Self::new(guid.clone(), guid, ORPHAN_DISTANCE)
    }

    /// The QC-failure record for `guid`.
    pub fn qc_fail(guid: impl Into<String>) -> Self {
        Self::new(guid, QC_FAIL_ID, 0)
    }

    pub fn is_orphan(&self) -> bool {
        self.a == self.b && self.dist == ORPHAN_DISTANCE
    }

    pub fn is_qc_fail(&self) -> bool {
        self.a == QC_FAIL_ID || self.b == QC_FAIL_ID
    }

    /// Whether this record is a real distance rather than a sentinel.
    pub fn is_distance(&self) -> bool {
        !self.is_orphan() && !self.is_qc_fail()
    }

    /// Checks both identifiers and rejects a self-pair that is not the
    /// orphan sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGuid`] or [`Error::InvalidComparison`].
    pub fn validate(&self) -> Result<()> {
        validate_guid(&self.a)?;
        validate_guid(&self.b)?;
        if self.a == self.b && self.dist != ORPHAN_DISTANCE {
            return Err(Error::InvalidComparison {
                reason: format!(
                    "self-pair {:?} must carry {ORPHAN_DISTANCE}, found {}",
                    self.a, self.dist
                ),
            });
        }
        Ok(())
    }

    /// Returns the same comparison with its pair in sorted order.
    pub fn canonical(&self) -> Self {
        if self.a <= self.b {
            self.clone()
        } else {
            Self::new(self.b.clone(), self.a.clone(), self.dist)
        }
    }
}

/// Outcome of [`DistanceStore::insert_many`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertReport {
    /// New rows written.
    pub inserted: usize,
    /// Triples dropped because their canonical pair was already known.
    pub skipped: usize,
}

/// Result of a neighbour lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeighborQuery {
    /// All stored neighbours of the sample and their distances. Empty for an
    /// orphan.
    Found(BTreeMap<String, i64>),
    /// No record touches the sample; it has not been processed yet.
    NotFound,
    /// The sample failed QC. Takes precedence over any other record.
    QcFail,
}

/// Canonicalized, deduplicated pairwise distances.
#[derive(Debug, Clone)]
pub struct DistanceStore {
    store: Store,
}

impl DistanceStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Inserts every comparison whose canonical pair is not yet stored.
    ///
    /// The existing key set is read once per call rather than probed per
    /// row, and the whole call is a single transaction.
    pub fn insert_many(&self, species: &Species, comparisons: &[Comparison]) -> Result<InsertReport> {
        for c in comparisons {
            c.validate()?;
        }
        self.store.write(|tx| insert_many_tx(tx, species, comparisons))
    }

    /// Looks up every neighbour of `guid`.
    pub fn query_neighbors(&self, species: &Species, guid: &str) -> Result<NeighborQuery> {
        let rows = self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT guid1, guid2, dist FROM distances
                 WHERE species = ?1 AND (guid1 = ?2 OR guid2 = ?2)",
            )?;
            let rows = stmt.query_map(params![species.as_str(), guid], |row| {
                Ok(Comparison::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get(2)?,
                ))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        if rows.is_empty() {
            return Ok(NeighborQuery::NotFound);
        }
        if rows.iter().any(Comparison::is_qc_fail) {
            return Ok(NeighborQuery::QcFail);
        }

        let neighbours = rows
            .into_iter()
            .filter(|c| !c.is_orphan())
            .map(|c| {
                let other = if c.a == guid { c.b } else { c.a };
                (other, c.dist)
            })
            .collect();
        Ok(NeighborQuery::Found(neighbours))
    }

    /// Number of stored records for `species`.
    pub fn count(&self, species: &Species) -> Result<usize> {
        self.store.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM distances WHERE species = ?1",
                params![species.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

pub(crate) fn insert_many_tx(
    conn: &Connection,
    species: &Species,
    comparisons: &[Comparison],
) -> Result<InsertReport> {
    let mut seen = existing_pairs(conn, species)?;
    let mut report = InsertReport::default();
    let mut insert = conn.prepare(
        "INSERT INTO distances (species, guid1, guid2, dist) VALUES (?1, ?2, ?3, ?4)",
    )?;

    for c in comparisons.iter().map(Comparison::canonical) {
        if !seen.insert((c.a.clone(), c.b.clone())) {
            report.skipped += 1;
            continue;
        }
        insert.execute(params![species.as_str(), c.a, c.b, c.dist])?;
        report.inserted += 1;
    }

    tracing::debug!(
        %species,
        inserted = report.inserted,
        skipped = report.skipped,
        "distances stored"
    );
    Ok(report)
}

fn existing_pairs(conn: &Connection, species: &Species) -> Result<HashSet<(String, String)>> {
    let mut stmt = conn.prepare("SELECT guid1, guid2 FROM distances WHERE species = ?1")?;
    let rows = stmt.query_map(params![species.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
}
