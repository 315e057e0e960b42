//! Running nearest neighbour per sample.
//!
//! Each sample has at most one row. A row is replaced only by a strictly
//! shorter distance, so on a tie the neighbour written first stays. Batches
//! are applied in sorted order, which makes "first" deterministic.

use crate::{Comparison, Result, Species, Store};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closest known neighbour of a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearestNeighbor {
    pub guid: String,
    pub closest: String,
    pub dist: i64,
}

#[derive(Debug, Clone)]
pub struct NeighborTracker {
    store: Store,
}

impl NeighborTracker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records `candidate` at `dist` as a neighbour of `guid`.
    ///
    /// Returns whether the stored row changed: `true` if `guid` had no row
    /// yet or `dist` beats the current minimum.
    pub fn observe(&self, species: &Species, guid: &str, candidate: &str, dist: i64) -> Result<bool> {
        Comparison::new(guid, candidate, dist).validate()?;
        self.store
            .write(|tx| upsert_nearest(tx, species, guid, candidate, dist))
    }

    /// Folds a batch of comparisons into the tracker in one transaction.
    ///
    /// Returns how many rows changed.
    pub fn observe_many(&self, species: &Species, comparisons: &[Comparison]) -> Result<usize> {
        for c in comparisons {
            c.validate()?;
        }
        self.store.write(|tx| observe_many_tx(tx, species, comparisons))
    }

    pub fn nearest(&self, species: &Species, guid: &str) -> Result<Option<NearestNeighbor>> {
        self.store.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT closest, dist FROM nearest WHERE species = ?1 AND guid = ?2",
                    params![species.as_str(), guid],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;
            Ok(row.map(|(closest, dist)| NearestNeighbor {
                guid: guid.to_string(),
                closest,
                dist,
            }))
        })
    }
}

pub(crate) fn observe_many_tx(
    conn: &Connection,
    species: &Species,
    comparisons: &[Comparison],
) -> Result<usize> {
    let mut sorted: Vec<Comparison> = comparisons
        .iter()
        .filter(|c| c.is_distance())
        .map(Comparison::canonical)
        .collect();
    sorted.sort_by(|x, y| (&x.a, &x.b, x.dist).cmp(&(&y.a, &y.b, y.dist)));

    let mut best: BTreeMap<&str, (&str, i64)> = BTreeMap::new();
    for c in &sorted {
        for (guid, other) in [(c.a.as_str(), c.b.as_str()), (c.b.as_str(), c.a.as_str())] {
            if best.get(guid).is_none_or(|&(_, current)| c.dist < current) {
                best.insert(guid, (other, c.dist));
            }
        }
    }

    let mut changed = 0;
    for (guid, (closest, dist)) in best {
        if upsert_nearest(conn, species, guid, closest, dist)? {
            changed += 1;
        }
    }
    tracing::debug!(%species, changed, "nearest neighbours updated");
    Ok(changed)
}

fn upsert_nearest(
    conn: &Connection,
    species: &Species,
    guid: &str,
    candidate: &str,
    dist: i64,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO nearest (species, guid, closest, dist) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (species, guid) DO UPDATE
         SET closest = excluded.closest, dist = excluded.dist
         WHERE excluded.dist < nearest.dist",
        params![species.as_str(), guid, candidate, dist],
    )?;
    Ok(changed == 1)
}
