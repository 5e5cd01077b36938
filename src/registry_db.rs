use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{docset::Docset, error::Result};

/// Docsets keyed by their position in the registry ordering.
const DOCSETS: TableDefinition<u64, &str> = TableDefinition::new("docsets");

/// Durable storage for the registry's ordered docset list.
pub struct RegistryDb {
    db: Database,
}

impl RegistryDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Create the table up front so readers never see it missing.
        let txn = db.begin_write()?;
        txn.open_table(DOCSETS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Replace the stored list with `docsets`, in order.
    ///
    /// The old list is dropped and the new one written in a single write
    /// transaction, so a reader sees either list in full.
    pub fn save_docsets(&self, docsets: &[Docset]) -> Result<()> {
        let encoded = docsets
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let txn = self.db.begin_write()?;
        txn.delete_table(DOCSETS)?;
        {
            let mut table = txn.open_table(DOCSETS)?;
            for (position, value) in encoded.iter().enumerate() {
                table.insert(position as u64, value.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Load the stored list in order.
    ///
    /// Entries that fail to decode are logged and skipped.
    pub fn load_docsets(&self) -> Result<Vec<Docset>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCSETS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            match serde_json::from_str::<Docset>(v.value()) {
                Ok(docset) => result.push(docset),
                Err(e) => tracing::warn!(
                    position = k.value(),
                    error = %e,
                    "skipping corrupt docset entry"
                ),
            }
        }
        Ok(result)
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, position: u64, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCSETS)?;
            table.insert(position, value)?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for RegistryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, RegistryDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = RegistryDb::open(&tmp.path().join("registry.redb")).unwrap();
        (tmp, db)
    }

    fn docset(name: &str, enabled: bool) -> Docset {
        Docset {
            identifier: name.to_lowercase(),
            name: name.to_string(),
            relative_path: format!("docsets/{name}.docset"),
            platform: "test".to_string(),
            enabled,
        }
    }

    #[test]
    fn empty_database_loads_empty_list() {
        let (_tmp, db) = test_db();
        assert!(db.load_docsets().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_preserves_order_and_flags() {
        let (_tmp, db) = test_db();
        let list = vec![
            docset("Rust", true),
            docset("Python", false),
            docset("Go", true),
        ];

        db.save_docsets(&list).unwrap();
        assert_eq!(db.load_docsets().unwrap(), list);
    }

    #[test]
    fn save_replaces_longer_list() {
        let (_tmp, db) = test_db();
        db.save_docsets(&[docset("A", true), docset("B", true)])
            .unwrap();
        db.save_docsets(&[docset("C", false)]).unwrap();

        assert_eq!(db.load_docsets().unwrap(), vec![docset("C", false)]);
    }

    #[test]
    fn corrupt_entries_are_skipped() {
        let (_tmp, db) = test_db();
        db.save_docsets(&[docset("A", true)]).unwrap();
        db.insert_raw(1, "{not json").unwrap();
        db.insert_raw(2, &serde_json::to_string(&docset("B", true)).unwrap())
            .unwrap();

        let loaded = db.load_docsets().unwrap();
        assert_eq!(loaded, vec![docset("A", true), docset("B", true)]);
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("registry.redb");

        {
            let db = RegistryDb::open(&path).unwrap();
            db.save_docsets(&[docset("Rust", false)]).unwrap();
        }

        {
            let db = RegistryDb::open(&path).unwrap();
            assert_eq!(db.load_docsets().unwrap(), vec![docset("Rust", false)]);
        }
    }
}
