use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::Path;

use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError,
};

const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
const PREFIX_END: char = '\u{10ffff}';

/// The backing key-value store.
///
/// Implementations need no internal locking: the store is owned by the
/// executor's worker and only ever touched from there. Single-key `put` and
/// `delete` must be atomic; nothing larger is required.
pub trait Store: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Returns whether the key was present.
    fn delete(&mut self, key: &str) -> Result<bool, StoreError>;

    /// Visits every key starting with `prefix` in ascending order until the
    /// visitor returns `false`.
    fn scan_prefix(
        &self,
        prefix: &str,
        visit: &mut dyn FnMut(&str, &[u8]) -> bool,
    ) -> Result<(), StoreError>;

    /// The greatest key starting with `prefix`, with its value.
    fn last_with_prefix(&self, prefix: &str) -> Result<Option<(String, Vec<u8>)>, StoreError>;
}

/// Store backed by a single redb table of string keys and byte values.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(StoreError::Io)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        Ok(Self { db })
    }
}

impl Store for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(RECORDS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = table.get(key)?.map(|value| value.value().to_vec());
        Ok(value)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let existed = table.remove(key)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visit: &mut dyn FnMut(&str, &[u8]) -> bool,
    ) -> Result<(), StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(RECORDS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let end = prefix_end(prefix);
        for entry in table.range(prefix..end.as_str())? {
            let entry = entry?;
            if !visit(entry.0.value(), entry.1.value()) {
                break;
            }
        }
        Ok(())
    }

    fn last_with_prefix(&self, prefix: &str) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(RECORDS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let end = prefix_end(prefix);
        let last = match table.range(prefix..end.as_str())?.next_back() {
            Some(entry) => {
                let entry = entry?;
                Some((entry.0.value().to_string(), entry.1.value().to_vec()))
            }
            None => None,
        };
        Ok(last)
    }
}

/// Store kept entirely in memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn range<'a>(
        &'a self,
        prefix: &'a str,
        end: &'a str,
    ) -> impl DoubleEndedIterator<Item = (&'a String, &'a Vec<u8>)> + 'a {
        self.entries
            .range::<str, _>((Bound::Included(prefix), Bound::Excluded(end)))
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visit: &mut dyn FnMut(&str, &[u8]) -> bool,
    ) -> Result<(), StoreError> {
        let end = prefix_end(prefix);
        for (key, value) in self.range(prefix, &end) {
            if !visit(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn last_with_prefix(&self, prefix: &str) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        let end = prefix_end(prefix);
        let last = self
            .range(prefix, &end)
            .next_back()
            .map(|(key, value)| (key.clone(), value.clone()));
        Ok(last)
    }
}

fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.to_string();
    end.push(PREFIX_END);
    end
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    /// A stored key or value could not be decoded.
    Malformed(String),
    /// Two live records claim the same id or path.
    IdentityConflict(String),
    /// The executor is not running, so the work was never queued.
    NotRunning,
    /// The work was queued but dropped before it ran.
    WorkerGone,
    /// The unit of work panicked; the worker carried on.
    WorkPanicked(String),
    /// Work was submitted from the store worker itself, which would block it
    /// on its own queue.
    Reentrant,
}

impl StoreError {
    /// Errors that mean the store or the index can no longer be trusted, as
    /// opposed to one record being unreadable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::IdentityConflict(_)
                | StoreError::NotRunning
                | StoreError::WorkerGone
                | StoreError::Reentrant
        )
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "io error: {}", err),
            StoreError::Redb(err) => write!(f, "db error: {}", err),
            StoreError::Bincode(err) => write!(f, "bincode error: {}", err),
            StoreError::Malformed(value) => write!(f, "malformed entry: {}", value),
            StoreError::IdentityConflict(value) => write!(f, "identity conflict: {}", value),
            StoreError::NotRunning => write!(f, "store executor is not running"),
            StoreError::WorkerGone => write!(f, "store worker exited before running the work"),
            StoreError::WorkPanicked(message) => write!(f, "store work panicked: {}", message),
            StoreError::Reentrant => write!(f, "work submitted from the store worker"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Redb(err)
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<TableError> for StoreError {
    fn from(err: TableError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<CommitError> for StoreError {
    fn from(err: CommitError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for StoreError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        StoreError::Bincode(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &mut dyn Store) {
        store.put("D\x1f0000000002", b"two").unwrap();
        store.put("D\x1f0000000001", b"one").unwrap();
        store.put("P\x1fa.mp3", b"x").unwrap();

        assert_eq!(store.get("D\x1f0000000001").unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get("missing").unwrap(), None);

        let mut seen = Vec::new();
        store
            .scan_prefix("D\x1f", &mut |key, _| {
                seen.push(key.to_string());
                true
            })
            .unwrap();
        assert_eq!(seen, vec!["D\x1f0000000001", "D\x1f0000000002"]);

        let mut first_only = 0;
        store
            .scan_prefix("D\x1f", &mut |_, _| {
                first_only += 1;
                false
            })
            .unwrap();
        assert_eq!(first_only, 1);

        let last = store.last_with_prefix("D\x1f").unwrap().unwrap();
        assert_eq!(last.0, "D\x1f0000000002");
        assert_eq!(last.1, b"two".to_vec());
        assert!(store.last_with_prefix("H\x1f").unwrap().is_none());

        assert!(store.delete("P\x1fa.mp3").unwrap());
        assert!(!store.delete("P\x1fa.mp3").unwrap());
        assert_eq!(store.get("P\x1fa.mp3").unwrap(), None);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&mut MemoryStore::new());
    }

    #[test]
    fn redb_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RedbStore::open(&dir.path().join("nested").join("index.redb")).unwrap();
        exercise(&mut store);
    }

    #[test]
    fn redb_store_reads_before_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&dir.path().join("index.redb")).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
        assert!(store.last_with_prefix("D\x1f").unwrap().is_none());
        store.scan_prefix("", &mut |_, _| panic!("no entries expected")).unwrap();
    }

    #[test]
    fn redb_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.redb");
        {
            let mut store = RedbStore::open(&path).unwrap();
            store.put("C\x1ftheme", b"dark").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("C\x1ftheme").unwrap(), Some(b"dark".to_vec()));
    }

    #[test]
    fn fatal_errors_are_classified() {
        assert!(StoreError::IdentityConflict("x".into()).is_fatal());
        assert!(StoreError::NotRunning.is_fatal());
        assert!(!StoreError::Malformed("x".into()).is_fatal());
        assert!(!StoreError::WorkPanicked("x".into()).is_fatal());
    }
}
