//! # Embedded Record Store
//!
//! Single-table key/value store on top of redb. Values are JSON documents,
//! keys are namespaced strings (see [`super::keys`]). Every access runs inside
//! a transaction: [`Store::view`] for reads, [`Store::update`] for writes that
//! commit only when the closure succeeds.

use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] redb::Error),
    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

fn backend(err: impl Into<redb::Error>) -> StoreError {
    StoreError::Backend(err.into())
}

/// Handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, dir = %parent.display(), "could not create storage directory");
            }
        }
        let db = Database::create(path).map_err(backend)?;
        debug!(path = %path.display(), "opened record store");
        Self::init(db)
    }

    /// Volatile store, used by tests and when no storage path is configured.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(backend)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, StoreError> {
        // Create the table up front so read transactions never miss it.
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(RECORDS).map_err(backend)?;
        txn.commit().map_err(backend)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Runs `f` in a read transaction.
    pub fn view<T, E>(&self, f: impl FnOnce(&ReadTxn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(RECORDS).map_err(backend)?;
        f(&ReadTxn { table })
    }

    /// Runs `f` in a write transaction, committing on `Ok` and rolling back
    /// on `Err`.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let txn = self.db.begin_write().map_err(backend)?;
        let result = {
            let table = txn.open_table(RECORDS).map_err(backend)?;
            let mut write = WriteTxn { table };
            f(&mut write)
        };

        match result {
            Ok(value) => {
                txn.commit().map_err(backend)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "failed to roll back write transaction");
                }
                Err(err)
            }
        }
    }
}

/// Read access shared by both transaction kinds.
pub trait Records {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// All records whose key starts with `prefix`, in key order.
    fn scan_raw(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.get_raw(key)?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>, StoreError> {
        self.scan_raw(prefix)?
            .into_iter()
            .map(|(key, bytes)| Ok((key, serde_json::from_slice(&bytes)?)))
            .collect()
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get_raw(key)?.is_some())
    }

    fn count_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        Ok(self.scan_raw(prefix)?.len())
    }
}

fn get_from<T>(table: &T, key: &str) -> Result<Option<Vec<u8>>, StoreError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(table
        .get(key)
        .map_err(backend)?
        .map(|guard| guard.value().to_vec()))
}

fn scan_from<T>(table: &T, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut records = Vec::new();
    for entry in table.range::<&str>(prefix..).map_err(backend)? {
        let (key, value) = entry.map_err(backend)?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        records.push((key.to_string(), value.value().to_vec()));
    }
    Ok(records)
}

pub struct ReadTxn {
    table: redb::ReadOnlyTable<&'static str, &'static [u8]>,
}

impl Records for ReadTxn {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        get_from(&self.table, key)
    }

    fn scan_raw(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        scan_from(&self.table, prefix)
    }
}

pub struct WriteTxn<'txn> {
    table: redb::Table<'txn, &'static str, &'static [u8]>,
}

impl Records for WriteTxn<'_> {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        get_from(&self.table, key)
    }

    fn scan_raw(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        scan_from(&self.table, prefix)
    }
}

impl WriteTxn<'_> {
    pub fn put_raw(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.table.insert(key, value).map_err(backend)?;
        Ok(())
    }

    pub fn put_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.put_raw(key, &bytes)
    }

    /// Returns whether the key existed.
    pub fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        Ok(self.table.remove(key).map_err(backend)?.is_some())
    }

    /// Deletes every record under `prefix`, returning how many were removed.
    pub fn delete_prefix(&mut self, prefix: &str) -> Result<usize, StoreError> {
        let keys: Vec<String> = self.scan_raw(prefix)?.into_iter().map(|(k, _)| k).collect();
        for key in &keys {
            self.delete(key)?;
        }
        Ok(keys.len())
    }
}
