//! Persistent key-value storage for cached lookups.
//!
//! Each instance hostname gets its own namespace backed by a JSON file.
//! Values are held in memory and written to disk on modification.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{PaletteError, PaletteResult};

/// A local key-value store.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<Value>;

    fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    fn set(&mut self, key: &str, value: Value) -> PaletteResult<()>;

    fn remove(&mut self, key: &str) -> PaletteResult<()>;

    fn keys(&self) -> Vec<String>;
}

/// Store shared between a cache and its background refreshes.
pub type SharedStore = Arc<Mutex<dyn KeyValueStore>>;

/// JSON-file store for one namespace.
pub struct JsonFileStore {
    namespace: String,
    path: PathBuf,
    values: HashMap<String, Value>,
    dirty: bool,
}

impl JsonFileStore {
    /// Open the store for `namespace` under `dir`, loading any existing
    /// file. An unreadable or corrupt file starts empty.
    pub fn open(namespace: &str, dir: &Path) -> Self {
        let path = dir.join(format!("{}.json", file_stem(namespace)));

        let values = if path.exists() {
            match fs::read_to_string(&path) {
                Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!(path = %path.display(), "discarding corrupt cache file: {}", e);
                    HashMap::new()
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to read cache file: {}", e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Self {
            namespace: namespace.to_string(),
            path,
            values,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Write pending changes to disk.
    pub fn flush(&mut self) -> PaletteResult<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PaletteError::Config(format!(
                    "Failed to create cache directory for '{}': {}",
                    self.namespace, e
                ))
            })?;
        }

        let contents = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, contents)?;

        self.dirty = false;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> PaletteResult<()> {
        self.values.insert(key.to_string(), value);
        self.dirty = true;
        self.flush()
    }

    fn remove(&mut self, key: &str) -> PaletteResult<()> {
        if self.values.remove(key).is_some() {
            self.dirty = true;
            self.flush()?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

impl Drop for JsonFileStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// In-memory store, for tests and for running without a cache directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> PaletteResult<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> PaletteResult<()> {
        self.values.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

/// Hostnames are safe already, but ports and odd input are not.
fn file_stem(namespace: &str) -> String {
    let stem: String = namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        "default".to_string()
    } else {
        stem
    }
}
