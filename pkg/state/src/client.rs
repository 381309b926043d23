use slatedb::Db;
use slatedb::object_store::ObjectStore;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use slatedb::object_store::path::Path;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::watch::{EventLog, EventType};

/// Errors from the registry store. `Conflict` and `NotFound` are matchable
/// so optimistic-concurrency retries and idempotent cleanup paths can tell
/// them apart from real failures.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("conflict writing '{key}': object changed concurrently")]
    Conflict { key: String },
    #[error("'{key}' not found")]
    NotFound { key: String },
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Persistent registry store backed by SlateDB.
///
/// Integrates with EventLog to emit watch events on mutations. Writes that
/// must not clobber concurrent updates go through [`StateStore::swap`],
/// which enforces a pre-image precondition the way the orchestrator's
/// resource-version checks do.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Db>,
    pub event_log: EventLog,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> Result<Self> {
        info!("Opening SlateDB state store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| StateError::Storage(format!("create data directory {}: {}", path, e)))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| StateError::Storage(format!("create local object store: {}", e)))?,
        );
        Self::open(object_store).await
    }

    /// Open a store over an in-memory object store. Used by tests and
    /// ephemeral deployments.
    pub async fn in_memory() -> Result<Self> {
        Self::open(Arc::new(InMemory::new())).await
    }

    async fn open(object_store: Arc<dyn ObjectStore>) -> Result<Self> {
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| StateError::Storage(format!("SlateDB open failed: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            event_log: EventLog::new(10_000),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Store a value under the given key. Emits a `Put` watch event.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| StateError::Storage(format!("SlateDB put failed: {}", e)))?;
        self.event_log
            .emit(EventType::Put, key.to_string(), Some(value.to_vec()))
            .await;
        Ok(())
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(StateError::Storage(format!("SlateDB get failed: {}", e))),
        }
    }

    /// Delete a key from the store. Emits a `Delete` watch event.
    /// Deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| StateError::Storage(format!("SlateDB delete failed: {}", e)))?;
        self.event_log
            .emit(EventType::Delete, key.to_string(), None)
            .await;
        Ok(())
    }

    /// Write `value` only if the stored bytes still equal `expected`
    /// (`None` = the key must not exist yet). Returns
    /// [`StateError::Conflict`] when the precondition fails, which callers
    /// handle by re-reading and retrying.
    pub async fn swap(&self, key: &str, expected: Option<&[u8]>, value: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let current = self.get(key).await?;
        let matches = match (&current, expected) {
            (None, None) => true,
            (Some(cur), Some(exp)) => cur.as_slice() == exp,
            _ => false,
        };
        if !matches {
            return Err(StateError::Conflict {
                key: key.to_string(),
            });
        }
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| StateError::Storage(format!("SlateDB put failed: {}", e)))?;
        self.event_log
            .emit(EventType::Put, key.to_string(), Some(value.to_vec()))
            .await;
        Ok(())
    }

    /// List all key-value pairs whose keys start with `prefix`.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut results = Vec::new();
        let start = prefix.as_bytes().to_vec();
        let end = {
            let mut end = start.clone();
            loop {
                match end.pop() {
                    Some(byte) if byte < 0xff => {
                        end.push(byte + 1);
                        break Bound::Excluded(end);
                    }
                    Some(_) => continue,
                    None => break Bound::Unbounded,
                }
            }
        };
        let mut iter = self
            .db
            .scan((Bound::Included(start), end))
            .await
            .map_err(|e| StateError::Storage(format!("SlateDB scan failed: {}", e)))?;

        while let Ok(Some(kv)) = iter.next().await {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> Result<()> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| StateError::Storage(format!("SlateDB close failed: {}", e)))
    }
}
