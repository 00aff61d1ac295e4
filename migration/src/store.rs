//! Persistence seams for the migration machinery: a key→(value, expiry)
//! transient store for flags and the advisory lock, and a record store
//! holding whole configuration trees.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Expiring key-value store for migration flags. `ttl = None` means the
/// entry never expires.
pub trait TransientStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>);
    fn delete(&self, key: &str);

    /// Set-if-absent with a TTL: the advisory lock primitive. Returns
    /// false when a live entry already holds the key.
    fn acquire(&self, key: &str, ttl: Duration) -> bool;
}

/// In-process [`TransientStore`] with lazy expiry checks.
#[derive(Default)]
pub struct MemoryTransientStore {
    entries: Mutex<HashMap<String, (Value, Option<Instant>)>>,
}

impl MemoryTransientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(deadline: &Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => *deadline > Instant::now(),
        None => true,
    }
}

impl TransientStore for MemoryTransientStore {
    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, deadline)) if is_live(deadline) => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value, deadline));
    }

    fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, deadline)) = entries.get(key) {
            if is_live(deadline) {
                return false;
            }
        }
        entries.insert(
            key.to_string(),
            (Value::Bool(true), Some(Instant::now() + ttl)),
        );
        true
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct PersistedEntry {
    value: Value,
    /// Unix seconds; `None` never expires.
    deadline: Option<u64>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn entry_live(entry: &PersistedEntry) -> bool {
    entry.deadline.is_none_or(|deadline| deadline > now_secs())
}

/// File-backed [`TransientStore`] so flags and the stored schema version
/// survive one-shot CLI runs. The whole map is rewritten on every
/// mutation, which is fine at this entry count.
pub struct FsTransientStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, PersistedEntry>>,
}

impl FsTransientStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(FsTransientStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, PersistedEntry>) {
        match serde_json::to_vec(entries) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&self.path, bytes) {
                    tracing::warn!(error = %err, "failed to persist transient store");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode transient store"),
        }
    }
}

impl TransientStore for FsTransientStore {
    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry_live(entry) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                self.persist(&entries);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| now_secs() + ttl.as_secs());
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), PersistedEntry { value, deadline });
        self.persist(&entries);
    }

    fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(key) {
            if entry_live(entry) {
                return false;
            }
        }
        entries.insert(
            key.to_string(),
            PersistedEntry {
                value: Value::Bool(true),
                deadline: Some(now_secs() + ttl.as_secs()),
            },
        );
        self.persist(&entries);
        true
    }
}

/// Store of persisted configuration records, read and written wholesale.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Record ids in a stable order, `offset`/`limit` windowed.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<String>, StoreError>;
    async fn load(&self, id: &str) -> Result<Value, StoreError>;
    async fn save(&self, id: &str, tree: &Value) -> Result<(), StoreError>;
}

/// One JSON file per record under a base directory; the record id is the
/// file stem.
pub struct FsRecordStore {
    base_dir: PathBuf,
}

impl FsRecordStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FsRecordStore {
            base_dir: base_dir.into(),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        // Directory order is arbitrary; sort so batching windows are stable.
        ids.sort();
        Ok(ids.into_iter().skip(offset).take(limit).collect())
    }

    async fn load(&self, id: &str) -> Result<Value, StoreError> {
        let bytes = tokio::fs::read(self.record_path(id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save(&self, id: &str, tree: &Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(tree)?;
        tokio::fs::write(self.record_path(id), bytes).await?;
        Ok(())
    }
}

/// In-memory [`RecordStore`] for embedding and tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, Value>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, tree: Value) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(id.to_string(), tree);
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<String>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.keys().skip(offset).take(limit).cloned().collect())
    }

    async fn load(&self, id: &str) -> Result<Value, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(id).cloned().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("record {id} not found"),
            ))
        })
    }

    async fn save(&self, id: &str, tree: &Value) -> Result<(), StoreError> {
        self.insert(id, tree.clone());
        Ok(())
    }
}
