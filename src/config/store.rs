//! Persistence port for user-authored rule sets
//!
//! The store is an opaque key-value array store. Each key holds a JSON array;
//! callers read it once at construction and write the whole array back on
//! every mutation.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key holding the macro list
pub const KEY_MACROS: &str = "macros";
/// Key holding the auto-reply rules
pub const KEY_AUTO_REPLIES: &str = "auto_replies";
/// Key holding the highlight rules
pub const KEY_HIGHLIGHTS: &str = "highlights";

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored value is not the expected shape
    #[error("Invalid data under '{key}': {source}")]
    Invalid {
        /// Offending key
        key: String,
        /// Parse failure
        source: serde_json::Error,
    },

    /// No usable config directory
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Array get/set persistence port
#[cfg_attr(test, mockall::automock)]
pub trait ConfigStore: Send + Sync {
    /// Read the array under `key`; a missing key is an empty array
    fn load(&self, key: &str) -> Result<Vec<Value>, StoreError>;

    /// Replace the array under `key`
    fn save(&self, key: &str, items: &[Value]) -> Result<(), StoreError>;
}

/// Load and deserialize a typed array
pub fn load_items<T: DeserializeOwned>(store: &dyn ConfigStore, key: &str) -> Result<Vec<T>, StoreError> {
    store
        .load(key)?
        .into_iter()
        .map(|value| {
            serde_json::from_value(value).map_err(|source| StoreError::Invalid {
                key: key.to_string(),
                source,
            })
        })
        .collect()
}

/// Serialize and write a typed array
pub fn save_items<T: Serialize>(store: &dyn ConfigStore, key: &str, items: &[T]) -> Result<(), StoreError> {
    let values = items
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| StoreError::Invalid {
            key: key.to_string(),
            source,
        })?;
    store.save(key, &values)
}

/// One pretty-printed JSON file per key
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Store files under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store files in the platform config directory
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = super::config_dir().ok_or(StoreError::NoConfigDir)?;
        std::fs::create_dir_all(&dir)?;
        Ok(Self::new(dir))
    }

    /// Backing directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|source| StoreError::Invalid {
            key: key.to_string(),
            source,
        })
    }

    fn save(&self, key: &str, items: &[Value]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(items).map_err(|source| StoreError::Invalid {
            key: key.to_string(),
            source,
        })?;
        std::fs::write(self.path_for(key), content)?;
        tracing::debug!(key, count = items.len(), "store written");
        Ok(())
    }
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self.entries.read().get(key).cloned().unwrap_or_default())
    }

    fn save(&self, key: &str, items: &[Value]) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), items.to_vec());
        Ok(())
    }
}
