//! In-process store shared between sibling contexts.
//!
//! A `MemoryStore` models the browser's origin-scoped storage inside one
//! process: every handle returned by [`MemoryStore::open_context`] sees the
//! same data, and each one is told about writes made through the others.
//! Tests use it to run two session managers side by side as if they were
//! two open windows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::{
    ContextId, EVENT_CHANNEL_SIZE, KeyValueStore, StorageEvent, StorageEvents,
    StoreError,
};

/// Counter for generating unique context IDs.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Backend {
    data: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

/// One context's handle onto a shared in-memory store.
///
/// Cloning keeps the same context identity; use
/// [`open_context`](Self::open_context) for a sibling.
#[derive(Clone)]
pub struct MemoryStore {
    id: ContextId,
    backend: Arc<Backend>,
}

impl MemoryStore {
    /// Creates an empty store and returns the first context's handle.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            id: next_context_id(),
            backend: Arc::new(Backend {
                data: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Opens another context onto the same data.
    pub fn open_context(&self) -> Self {
        Self {
            id: next_context_id(),
            backend: Arc::clone(&self.backend),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.backend.data.lock().map(|data| data.len()).unwrap_or(0)
    }

    /// Returns `true` if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        // No subscribers is fine: nobody else is listening.
        let _ = self.backend.events.send(StorageEvent {
            key: Some(key.to_string()),
            old_value,
            new_value,
            origin: self.id,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.backend.data.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data =
            self.backend.data.lock().map_err(|_| StoreError::Poisoned)?;
        let old = data.insert(key.to_string(), value.to_string());
        // Notify under the lock so observers see writes in commit order.
        self.notify(key, old, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.remove_many(&[key])
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut data =
            self.backend.data.lock().map_err(|_| StoreError::Poisoned)?;
        for key in keys {
            if let Some(old) = data.remove(*key) {
                self.notify(key, Some(old), None);
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> StorageEvents {
        StorageEvents::new(self.id, self.backend.events.subscribe())
    }

    fn context_id(&self) -> ContextId {
        self.id
    }
}

fn next_context_id() -> ContextId {
    ContextId::new(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_set_then_get_returns_value() {
        let store = MemoryStore::new();

        store.set("k", "v").unwrap();

        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let store = MemoryStore::new();

        assert!(store.remove("nope").is_ok());
    }

    #[test]
    fn test_open_context_shares_data() {
        let a = MemoryStore::new();
        let b = a.open_context();

        a.set("k", "v").unwrap();

        assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));
        assert_ne!(a.context_id(), b.context_id());
    }

    #[test]
    fn test_clone_keeps_context_id() {
        let a = MemoryStore::new();

        assert_eq!(a.clone().context_id(), a.context_id());
    }

    #[test]
    fn test_remove_many_removes_all_keys() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.set("c", "3").unwrap();

        store.remove_many(&["a", "b"]).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get("c").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_subscribe_sees_sibling_writes_only() {
        let a = MemoryStore::new();
        let b = a.open_context();
        let mut b_events = b.subscribe();

        b.set("own", "ignored").unwrap();
        a.set("k", "v").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), b_events.recv())
            .await
            .expect("should receive")
            .expect("feed open");
        assert_eq!(event.key.as_deref(), Some("k"));
        assert_eq!(event.new_value.as_deref(), Some("v"));
        assert_eq!(event.origin, a.context_id());
    }

    #[tokio::test]
    async fn test_subscribe_reports_removal_with_old_value() {
        let a = MemoryStore::new();
        let b = a.open_context();
        a.set("k", "v").unwrap();
        let mut b_events = b.subscribe();

        a.remove("k").unwrap();

        let event = b_events.recv().await.expect("feed open");
        assert!(event.is_removal_of("k"));
        assert_eq!(event.old_value.as_deref(), Some("v"));
    }
}
