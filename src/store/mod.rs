//! Persistent key-value storage.
//!
//! Everything the session needs to survive a restart (pending callbacks, custom
//! data, cached graph results) is stored as JSON strings under fixed keys.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;

/// Key holding the pending callback queue.
pub const CALLBACK_QUEUE_KEY: &str = "msal.callbackqueue";

/// Key holding application defined custom data.
pub const CUSTOM_DATA_KEY: &str = "msal.custom";

/// Prefix for cached graph results; the access token is appended.
pub const GRAPH_CACHE_PREFIX: &str = "msal.msgraph-";

/// Synchronous string key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
