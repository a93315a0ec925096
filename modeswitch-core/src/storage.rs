//! Persisted key/value records.
//!
//! One logical record per mode switch, one per override, and one shared event
//! collection. Writes are all-or-nothing per record; there are no cross-record
//! transactions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModesError, ModesResult};

pub const STORAGE_VERSION: u32 = 1;

/// Key of the shared event collection record.
pub const EVENTS_KEY: &str = "events";

pub fn switch_key(mode_key: &str) -> String {
    format!("switch.{}", mode_key)
}

pub fn override_key(mode_key: &str) -> String {
    format!("override.{}", mode_key)
}

pub trait Storage: Send + Sync {
    fn load(&self, key: &str) -> ModesResult<Option<Value>>;

    fn save(&self, key: &str, value: &Value) -> ModesResult<()>;
}

/// On-disk envelope around every record.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    key: String,
    data: Value,
}

/// Load and deserialize a typed record. Missing records are `Ok(None)`.
pub fn load_record<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> ModesResult<Option<T>> {
    match storage.load(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ModesError::Serialization(format!("record '{}': {}", key, e))),
        None => Ok(None),
    }
}

/// Serialize and save a typed record.
pub fn save_record<T: Serialize>(storage: &dyn Storage, key: &str, record: &T) -> ModesResult<()> {
    let value = serde_json::to_value(record)
        .map_err(|e| ModesError::Serialization(format!("record '{}': {}", key, e)))?;
    storage.save(key, &value)
}

/// One JSON file per record under a data directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStorage { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> ModesResult<Option<Value>> {
        let path = self.path_for(key);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = serde_json::from_str(&content).map_err(|e| {
            ModesError::Serialization(format!("cannot parse {}: {}", path.display(), e))
        })?;

        if envelope.version > STORAGE_VERSION {
            return Err(ModesError::Serialization(format!(
                "{} has version {}, newer than supported version {}",
                path.display(),
                envelope.version,
                STORAGE_VERSION
            )));
        }

        Ok(Some(envelope.data))
    }

    fn save(&self, key: &str, value: &Value) -> ModesResult<()> {
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.dir)?;

            let envelope = Envelope {
                version: STORAGE_VERSION,
                key: key.to_string(),
                data: value.clone(),
            };
            let content = serde_json::to_string_pretty(&envelope)?;

            let path = self.path_for(key);
            let temp = self.dir.join(format!("{}.json.tmp", key));
            std::fs::write(&temp, content)?;
            std::fs::rename(&temp, &path)
        };

        write().map_err(|e| ModesError::Persistence(format!("cannot write '{}': {}", key, e)))
    }
}

/// In-memory storage with write-failure injection.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> ModesResult<Option<Value>> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records.get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> ModesResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ModesError::Persistence(format!(
                "write of '{}' rejected by storage",
                key
            )));
        }
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.insert(key.to_string(), value.clone());
        Ok(())
    }
}
