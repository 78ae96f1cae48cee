//! Durable, ordered queue of pending handler invocations.
//!
//! The persisted queue under [`CALLBACK_QUEUE_KEY`] always mirrors the in-memory
//! queue: every push or removal re-serializes the whole queue, and the key is
//! removed once the queue is empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use super::event::{CallbackEvent, EventKind, QueueEntry};
use super::handlers::HandlerRegistry;
use crate::auth::session::SessionManager;
use crate::error::StoreError;
use crate::store::{KvStore, CALLBACK_QUEUE_KEY};

pub struct CallbackQueue {
    entries: Mutex<Vec<QueueEntry>>,
    registry: HandlerRegistry,
    store: Arc<dyn KvStore>,
    next_id: AtomicU64,
}

impl CallbackQueue {
    pub fn new(registry: HandlerRegistry, store: Arc<dyn KvStore>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            registry,
            store,
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether events of `kind` are queued at all.
    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.registry.contains(kind)
    }

    /// Read the persisted queue.
    ///
    /// Entries that cannot be decoded (for instance event kinds written by another
    /// version) are skipped rather than failing the whole load.
    pub fn load_persisted(&self) -> Vec<QueueEntry> {
        let Some(raw) = self.store.get(CALLBACK_QUEUE_KEY) else {
            return Vec::new();
        };

        let items: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!("Discarding unreadable callback queue: {}", e);
                return Vec::new();
            }
        };

        let entries: Vec<QueueEntry> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<QueueEntry>(item) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unknown callback queue entry: {}", e);
                    None
                }
            })
            .collect();

        // Keep ids unique across restarts
        for entry in &entries {
            if let Some(n) = id_sequence(&entry.id) {
                self.next_id.fetch_max(n + 1, Ordering::SeqCst);
            }
        }

        debug!("Loaded {} persisted callbacks", entries.len());
        entries
    }

    /// Build an entry for `event`, or `None` when no handler is registered for it.
    pub fn create_entry(&self, event: CallbackEvent) -> Option<QueueEntry> {
        let kind = event.kind();
        if !self.registry.contains(kind) {
            return None;
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Some(QueueEntry {
            id: format!("cb-{}-{}", kind.path(), n),
            event,
        })
    }

    /// Replace the in-memory queue and persist it.
    pub fn restore(&self, entries: Vec<QueueEntry>) {
        let mut queue = self.lock();
        *queue = entries;
        self.persist(&queue);
    }

    /// Append an entry for `event` and persist the queue. No-op without a handler.
    pub fn push(&self, event: CallbackEvent) -> Option<QueueEntry> {
        let entry = self.create_entry(event)?;
        let mut queue = self.lock();
        queue.push(entry.clone());
        self.persist(&queue);
        Some(entry)
    }

    /// Snapshot of the pending entries, in delivery order.
    pub fn pending(&self) -> Vec<QueueEntry> {
        self.lock().clone()
    }

    /// Deliver `entries` one after another.
    ///
    /// Successful entries are removed; failing ones stay queued for a later pass
    /// and the failure is only logged.
    pub async fn execute(&self, ctx: &Arc<SessionManager>, entries: Vec<QueueEntry>) {
        for entry in entries {
            // Another pass may have delivered it meanwhile
            if !self.contains(&entry.id) {
                continue;
            }

            let Some(handler) = self.registry.get(entry.event.kind()) else {
                warn!("No handler registered for callback '{}', keeping it queued", entry.id);
                continue;
            };

            match handler(Arc::clone(ctx), entry.event.clone()).await {
                Ok(()) => {
                    debug!("Callback '{}' delivered", entry.id);
                    self.remove(&entry.id);
                }
                Err(e) => {
                    warn!("Callback '{}' failed with error: {}", entry.id, e);
                }
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.lock().iter().any(|entry| entry.id == id)
    }

    fn remove(&self, id: &str) {
        let mut queue = self.lock();
        queue.retain(|entry| entry.id != id);
        self.persist(&queue);
    }

    fn persist(&self, queue: &[QueueEntry]) {
        let result = if queue.is_empty() {
            self.store.remove(CALLBACK_QUEUE_KEY)
        } else {
            serde_json::to_string(queue)
                .map_err(StoreError::from)
                .and_then(|json| self.store.set(CALLBACK_QUEUE_KEY, &json))
        };

        if let Err(e) = result {
            warn!("Failed to persist callback queue: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Numeric suffix of an entry id (`cb-auth.onToken-7` -> 7).
fn id_sequence(id: &str) -> Option<u64> {
    id.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::IdentityError;
    use crate::callbacks::handlers::Handlers;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn token_queue(store: &Arc<MemoryStore>) -> CallbackQueue {
        let handlers =
            Handlers::new().on_token(|_ctx, _error, _response| async { anyhow::Ok(()) });
        CallbackQueue::new(
            HandlerRegistry::from_handlers(&handlers),
            Arc::clone(store) as Arc<dyn KvStore>,
        )
    }

    fn token_error() -> CallbackEvent {
        CallbackEvent::Token {
            error: Some(IdentityError::new("network_error", "offline")),
            response: None,
        }
    }

    #[test]
    fn test_push_without_handler_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let queue = token_queue(&store);

        let pushed = queue.push(CallbackEvent::GraphResponse {
            results: Default::default(),
        });
        assert!(pushed.is_none());
        assert!(!queue.is_registered(EventKind::GraphResponse));
        assert!(queue.is_registered(EventKind::Token));
        assert!(queue.pending().is_empty());
        assert!(store.get(CALLBACK_QUEUE_KEY).is_none());
    }

    #[test]
    fn test_push_persists_whole_queue() {
        let store = Arc::new(MemoryStore::new());
        let queue = token_queue(&store);

        let first = queue.push(token_error()).unwrap();
        let second = queue.push(token_error()).unwrap();
        assert_ne!(first.id, second.id);
        assert!(first.id.starts_with("cb-auth.onToken-"));

        let persisted: Vec<QueueEntry> =
            serde_json::from_str(&store.get(CALLBACK_QUEUE_KEY).unwrap()).unwrap();
        assert_eq!(persisted, queue.pending());

        queue.restore(Vec::new());
        assert!(store.get(CALLBACK_QUEUE_KEY).is_none());
    }

    #[test]
    fn test_load_skips_unknown_kinds_and_continues_ids() {
        let store = Arc::new(MemoryStore::new());
        let known = QueueEntry {
            id: "cb-auth.onToken-41".into(),
            event: token_error(),
        };
        let raw = json!([
            {"id": "cb-auth.onPopup-3", "event": {"kind": "popup_closed"}},
            serde_json::to_value(&known).unwrap(),
        ]);
        store.set(CALLBACK_QUEUE_KEY, &raw.to_string()).unwrap();

        let queue = token_queue(&store);
        let loaded = queue.load_persisted();
        assert_eq!(loaded, vec![known]);

        let fresh = queue.create_entry(token_error()).unwrap();
        assert_eq!(fresh.id, "cb-auth.onToken-42");
    }

    #[test]
    fn test_load_corrupt_queue() {
        let store = Arc::new(MemoryStore::new());
        store.set(CALLBACK_QUEUE_KEY, "{oops").unwrap();
        assert!(token_queue(&store).load_persisted().is_empty());
    }

    #[test]
    fn test_id_sequence() {
        assert_eq!(id_sequence("cb-auth.onToken-7"), Some(7));
        assert_eq!(id_sequence("cb-auth.onToken"), None);
    }
}
