//! Durable storage for chain stores
//!
//! Each chain store is saved as one `{chain, unconfirmed_transactions}`
//! snapshot. A save replaces the previous snapshot as a whole: either the new
//! content is visible afterwards or the old content is left intact.

use crate::blockchain::ChainSnapshot;
use crate::config::StorageBackend;
use crate::error::ChainError;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// Abstraction for persistence backends.
pub trait Persistence: Send + Sync {
    /// Overwrite the stored snapshot.
    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), ChainError>;
    /// Stored snapshot, or `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<ChainSnapshot>, ChainError>;
    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Open the configured backend at `path`.
pub fn open_store(backend: StorageBackend, path: &Path) -> Result<Box<dyn Persistence>, ChainError> {
    Ok(match backend {
        StorageBackend::Json => Box::new(JsonFileStore::new(path)?),
        StorageBackend::Sqlite => Box::new(SqliteStore::open(path)?),
    })
}

/// Pretty-printed JSON file replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ChainError::Storage(format!("Failed to create data dir {:?}: {}", parent, e))
                })?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl Persistence for JsonFileStore {
    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), ChainError> {
        let data = serde_json::to_vec_pretty(snapshot)?;

        // Same directory as the target so the final rename stays on one filesystem.
        let mut tmp = NamedTempFile::new_in(self.dir())
            .map_err(|e| ChainError::Storage(format!("Failed to create temp file: {}", e)))?;
        tmp.write_all(&data)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| ChainError::Storage(format!("Failed to write snapshot: {}", e)))?;
        tmp.persist(&self.path).map_err(|e| {
            ChainError::Storage(format!("Failed to replace {}: {}", self.path.display(), e.error))
        })?;
        Ok(())
    }

    fn load(&self) -> Result<Option<ChainSnapshot>, ChainError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)
            .map_err(|e| ChainError::Storage(format!("Failed to read {}: {}", self.path.display(), e)))?;
        let snapshot = serde_json::from_slice::<ChainSnapshot>(&data).map_err(|e| {
            ChainError::Storage(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;
        Ok(Some(snapshot))
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// SQLite database holding a single snapshot row, replaced inside a transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    label: String,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| ChainError::Storage(format!("Failed to open database: {}", e)))?;
        Self::init(conn, path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self, ChainError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ChainError::Storage(format!("Failed to open database: {}", e)))?;
        Self::init(conn, ":memory:".to_string())
    }

    fn init(conn: Connection, label: String) -> Result<Self, ChainError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chain_snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                saved_at INTEGER NOT NULL,
                snapshot TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::Storage(format!("Failed to create chain_snapshot table: {}", e)))?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
            label,
        })
    }
}

impl Persistence for SqliteStore {
    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), ChainError> {
        let snapshot_json = serde_json::to_string(snapshot)?;

        let conn_guard = self
            .conn
            .lock()
            .map_err(|_| ChainError::Storage("Mutex poisoned".to_string()))?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(|e| ChainError::Storage(format!("Failed to start transaction: {}", e)))?;

        tx.execute(
            "INSERT OR REPLACE INTO chain_snapshot (id, saved_at, snapshot) VALUES (1, ?1, ?2)",
            params![chrono::Utc::now().timestamp_millis(), snapshot_json],
        )
        .map_err(|e| ChainError::Storage(format!("Failed to save snapshot: {}", e)))?;

        tx.commit()
            .map_err(|e| ChainError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<ChainSnapshot>, ChainError> {
        let conn_guard = self
            .conn
            .lock()
            .map_err(|_| ChainError::Storage("Mutex poisoned".to_string()))?;
        let stored: Option<String> = conn_guard
            .query_row("SELECT snapshot FROM chain_snapshot WHERE id = 1", [], |row| row.get(0))
            .optional()
            .map_err(|e| ChainError::Storage(format!("Failed to query snapshot: {}", e)))?;

        stored
            .map(|json| {
                serde_json::from_str::<ChainSnapshot>(&json)
                    .map_err(|e| ChainError::Storage(format!("Failed to parse snapshot: {}", e)))
            })
            .transpose()
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.label)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub snapshot: Arc<Mutex<Option<ChainSnapshot>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail, simulating an unwritable disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Option<ChainSnapshot> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }
}

impl Persistence for InMemoryPersistence {
    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), ChainError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChainError::Storage("Simulated write failure".to_string()));
        }
        let mut stored = self
            .snapshot
            .lock()
            .map_err(|_| ChainError::Storage("Mutex poisoned".to_string()))?;
        *stored = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<ChainSnapshot>, ChainError> {
        let stored = self
            .snapshot
            .lock()
            .map_err(|_| ChainError::Storage("Mutex poisoned".to_string()))?;
        Ok(stored.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ChainStore;
    use crate::transaction::Transaction;

    fn sample_snapshot() -> ChainSnapshot {
        let mut store = ChainStore::new(1);
        store.add_transaction(Transaction::new("VOID001", "Democratic Party", 1));
        store.mine();
        store.add_transaction(Transaction::new("VOID002", "Socialist party", 2));
        store.snapshot()
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("public_chain.json")).unwrap();
        assert!(store.load().unwrap().is_none());

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_json_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/counting_chain.json")).unwrap();

        store.save(&sample_snapshot()).unwrap();
        let genesis_only = ChainStore::new(1).snapshot();
        store.save(&genesis_only).unwrap();

        assert_eq!(store.load().unwrap(), Some(genesis_only));
        // Only the target file remains; temp files were renamed away.
        let entries = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_json_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("chain.json")).unwrap();
        store.save(&sample_snapshot()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert!(raw["chain"].is_array());
        assert!(raw["unconfirmed_transactions"].is_array());
        assert!(raw["chain"][1]["hash"].is_string());
        assert_eq!(raw["chain"][0]["previous_hash"], "0");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        fs::write(&path, b"{ not json").unwrap();
        let store = JsonFileStore::new(&path).unwrap();
        assert!(matches!(store.load(), Err(ChainError::Storage(_))));
    }

    #[test]
    fn test_sqlite_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load().unwrap().is_none());

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_sqlite_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public_chain.db");
        let snapshot = sample_snapshot();
        {
            let store = open_store(StorageBackend::Sqlite, &path).unwrap();
            store.save(&snapshot).unwrap();
        }
        let reopened = open_store(StorageBackend::Sqlite, &path).unwrap();
        assert_eq!(reopened.load().unwrap(), Some(snapshot));
        assert!(reopened.describe().starts_with("sqlite:"));
    }

    #[test]
    fn test_in_memory_failure_injection() {
        let store = InMemoryPersistence::new();
        store.set_fail_writes(true);
        assert!(store.save(&sample_snapshot()).is_err());
        assert!(store.stored().is_none());
    }
}
