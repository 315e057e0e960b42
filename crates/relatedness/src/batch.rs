//! Deferred-processing set for samples that arrived while the lease queue
//! was saturated.

use crate::{Result, Species, Store, validate_guid};
use rusqlite::{Connection, params};

/// The batch of diverted samples.
#[derive(Debug, Clone)]
pub struct BatchSet {
    store: Store,
}

impl BatchSet {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Adds `guid` to the batch. Returns `false` if it was already there.
    pub fn divert(&self, species: &Species, guid: &str) -> Result<bool> {
        validate_guid(guid)?;
        self.store.write(|tx| divert_tx(tx, species, guid))
    }

    /// Returns the batched guids, sorted.
    pub fn list(&self, species: &Species) -> Result<Vec<String>> {
        self.store.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT guid FROM batch WHERE species = ?1 ORDER BY guid ASC")?;
            let rows = stmt.query_map(params![species.as_str()], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
    }

    /// Removes exactly the named guids. Unknown guids are ignored.
    ///
    /// Returns how many entries were removed.
    pub fn clear<I, S>(&self, species: &Species, guids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store.write(|tx| clear_tx(tx, species, guids))
    }
}

pub(crate) fn divert_tx(conn: &Connection, species: &Species, guid: &str) -> Result<bool> {
    let added = conn.execute(
        "INSERT OR IGNORE INTO batch (species, guid) VALUES (?1, ?2)",
        params![species.as_str(), guid],
    )?;
    Ok(added == 1)
}

pub(crate) fn clear_tx<I, S>(conn: &Connection, species: &Species, guids: I) -> Result<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut stmt = conn.prepare("DELETE FROM batch WHERE species = ?1 AND guid = ?2")?;
    let mut removed = 0;
    for guid in guids {
        removed += stmt.execute(params![species.as_str(), guid.as_ref()])?;
    }
    tracing::debug!(%species, removed, "batch entries cleared");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> (BatchSet, Species) {
        let store = Store::open_in_memory().unwrap();
        (BatchSet::new(store), Species::new("tb").unwrap())
    }

    #[test]
    fn divert_is_idempotent() {
        let (batch, species) = batch();
        assert!(batch.divert(&species, "s1").unwrap());
        assert!(!batch.divert(&species, "s1").unwrap());
        assert_eq!(batch.list(&species).unwrap(), vec!["s1".to_string()]);
    }

    #[test]
    fn clear_removes_only_named_entries() {
        let (batch, species) = batch();
        for guid in ["s1", "s2", "s3"] {
            batch.divert(&species, guid).unwrap();
        }

        let removed = batch.clear(&species, ["s1", "s3", "unknown"]).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(batch.list(&species).unwrap(), vec!["s2".to_string()]);
    }

    #[test]
    fn species_are_isolated() {
        let (batch, tb) = batch();
        let ecoli = Species::new("ecoli").unwrap();
        batch.divert(&tb, "s1").unwrap();

        assert!(batch.list(&ecoli).unwrap().is_empty());
        assert_eq!(batch.clear(&ecoli, ["s1"]).unwrap(), 0);
        assert_eq!(batch.list(&tb).unwrap().len(), 1);
    }
}
