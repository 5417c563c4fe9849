//! Durable per-operator state.
//!
//! Operators that need resumable state (the file tailer's offsets) talk to a
//! [`Persister`]: a string-keyed byte-blob store scoped to one operator ID.
//! A [`Database`] hands out those scopes. Two implementations ship:
//!
//! - [`SledDatabase`]: an embedded [`sled`] database with one tree per
//!   operator ID, so scopes cannot collide and clearing one operator's
//!   state never touches another's.
//! - [`StubDatabase`]: in-memory scopes for tests and for tooling (the
//!   `graph` subcommand) that must build a pipeline without touching disk.
//!
//! Persistence is best-effort at runtime: a failed write is logged by the
//! caller and retried on the next checkpoint.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// String-keyed byte-blob storage scoped to a single operator.
pub trait Persister: Send + Sync {
    /// Reads the blob stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError>;

    /// Stores `value` under `key`, replacing any previous blob.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistError>;

    /// Removes the blob stored under `key`.
    fn delete(&self, key: &str) -> Result<(), PersistError>;
}

/// A handle that can mint per-operator [`Persister`] scopes.
pub trait Database: Send + Sync {
    /// Returns the persister scoped to `scope` (an operator ID).
    fn scoped(&self, scope: &str) -> Result<Arc<dyn Persister>, PersistError>;

    /// Flushes any buffered writes to stable storage.
    fn sync(&self) -> Result<(), PersistError>;
}

/// Embedded key-value database backed by sled.
///
/// Each scope maps to a sled tree named by the operator ID, mirroring a
/// bucket-per-owner layout.
pub struct SledDatabase {
    db: sled::Db,
}

impl SledDatabase {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        let db = sled::open(path)?;
        Ok(SledDatabase { db })
    }
}

impl Database for SledDatabase {
    fn scoped(&self, scope: &str) -> Result<Arc<dyn Persister>, PersistError> {
        let tree = self.db.open_tree(scope)?;
        Ok(Arc::new(SledPersister { tree }))
    }

    fn sync(&self) -> Result<(), PersistError> {
        self.db.flush()?;
        Ok(())
    }
}

struct SledPersister {
    tree: sled::Tree,
}

impl Persister for SledPersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(self.tree.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistError> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistError> {
        self.tree.remove(key)?;
        Ok(())
    }
}

/// In-memory database with no durability.
#[derive(Default)]
pub struct StubDatabase {
    scopes: Mutex<HashMap<String, Arc<StubPersister>>>,
}

impl StubDatabase {
    pub fn new() -> Self {
        StubDatabase::default()
    }
}

impl Database for StubDatabase {
    fn scoped(&self, scope: &str) -> Result<Arc<dyn Persister>, PersistError> {
        let mut scopes = self.scopes.lock().expect("scope lock");
        let persister = scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(StubPersister::default()))
            .clone();
        Ok(persister)
    }

    fn sync(&self) -> Result<(), PersistError> {
        Ok(())
    }
}

#[derive(Default)]
struct StubPersister {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl Persister for StubPersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(self.entries.lock().expect("entry lock").get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistError> {
        self.entries
            .lock()
            .expect("entry lock")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistError> {
        self.entries.lock().expect("entry lock").remove(key);
        Ok(())
    }
}
