//! Key-value store persisted as a single local JSON file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use directories::ProjectDirs;
use tracing::{debug, error, warn};

use super::KvStore;
use crate::error::StoreError;

/// Store file name.
const STORE_FILE: &str = "session_store.json";

/// Get the default path of the store file.
///
/// Returns `~/Library/Application Support/de.malvik.azuresession/session_store.json` on macOS.
pub fn default_store_path() -> Option<PathBuf> {
    ProjectDirs::from("de", "malvik", "azuresession")
        .map(|dirs| dirs.config_dir().join(STORE_FILE))
}

/// File backed store. The whole key space is rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        let path = default_store_path()
            .ok_or_else(|| StoreError::ReadFailed("Could not determine config directory".into()))?;
        Ok(Self::open(path))
    }

    /// Open (or lazily create) a store at `path`.
    ///
    /// A missing or corrupted file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = load_items(&path);
        Self {
            path,
            items: Mutex::new(items),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> Result<(), StoreError> {
        // Create parent directories if they don't exist
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(items)?;
        fs::write(&self.path, content).map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        debug!("Saved session store to {:?}", self.path);
        Ok(())
    }
}

fn load_items(path: &Path) -> BTreeMap<String, String> {
    if !path.exists() {
        debug!("Session store {:?} does not exist, starting empty", path);
        return BTreeMap::new();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(items) => items,
            Err(e) => {
                error!("Failed to parse session store: {}, starting empty", e);
                BTreeMap::new()
            }
        },
        Err(e) => {
            error!("Failed to read session store: {}, starting empty", e);
            BTreeMap::new()
        }
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_string(), value.to_string());
        self.flush(&items)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if items.remove(key).is_none() {
            return Ok(());
        }
        if let Err(e) = self.flush(&items) {
            warn!("Failed to persist removal of {}: {}", key, e);
            return Err(e);
        }
        Ok(())
    }
}
