//! Application defined custom data, persisted as one JSON object.

use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::StoreError;
use crate::store::{KvStore, CUSTOM_DATA_KEY};

/// Load the persisted custom data map. Missing or unreadable data yields an empty map.
pub fn load(store: &dyn KvStore) -> Map<String, Value> {
    let Some(raw) = store.get(CUSTOM_DATA_KEY) else {
        return Map::new();
    };

    match serde_json::from_str(&raw) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to parse stored custom data: {}", e);
            Map::new()
        }
    }
}

/// Write the whole map, or drop the key when the map is empty.
pub fn store(store: &dyn KvStore, data: &Map<String, Value>) -> Result<(), StoreError> {
    if data.is_empty() {
        debug!("Custom data empty, removing persisted entry");
        return store.remove(CUSTOM_DATA_KEY);
    }
    store.set(CUSTOM_DATA_KEY, &serde_json::to_string(data)?)
}
