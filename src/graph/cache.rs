//! Graph results cache, scoped to the access token it was fetched with.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{KvStore, GRAPH_CACHE_PREFIX};

/// Results cache for one access token. A new token means a new, empty cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphCache {
    key: String,
}

impl GraphCache {
    pub fn for_token(access_token: &str) -> Self {
        Self {
            key: format!("{}{}", GRAPH_CACHE_PREFIX, access_token),
        }
    }

    /// Store key of this cache.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Previously cached results, keyed by endpoint id.
    pub fn load(&self, store: &dyn KvStore) -> Map<String, Value> {
        let Some(raw) = store.get(&self.key) else {
            return Map::new();
        };

        match serde_json::from_str(&raw) {
            Ok(results) => results,
            Err(e) => {
                warn!("Ignoring unreadable graph cache: {}", e);
                Map::new()
            }
        }
    }

    /// Persist `results` minus the `forced` ids.
    pub fn save(
        &self,
        store: &dyn KvStore,
        results: &Map<String, Value>,
        forced: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        let cacheable: Map<String, Value> = results
            .iter()
            .filter(|(id, _)| !forced.contains(id.as_str()))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();

        debug!("Caching {} graph results", cacheable.len());
        store.set(&self.key, &serde_json::to_string(&cacheable)?)
    }
}
