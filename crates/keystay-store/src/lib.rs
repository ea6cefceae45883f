//! Storage abstraction layer for Keystay.
//!
//! Provides the [`KeyValueStore`] trait: a small, synchronous string store
//! that survives restarts and is shared between execution contexts (several
//! windows of the same client, or several processes on one machine). Every
//! store can also report mutations made by *other* contexts through
//! [`KeyValueStore::subscribe`].
//!
//! On top of it sits [`CredentialStore`], the only code that knows which
//! keys hold the token pair and the session summary.
//!
//! # Feature Flags
//!
//! - `file` (default) — [`FileStore`], a JSON file backend with a polling
//!   change watcher.

mod credential;
mod error;
#[cfg(feature = "file")]
mod file;
mod memory;

pub use credential::{
    CredentialStore, LEGACY_ACCESS_KEY, LEGACY_REFRESH_KEY, SUMMARY_KEY,
    TOKENS_KEY,
};
pub use error::StoreError;
#[cfg(feature = "file")]
pub use file::FileStore;
pub use memory::MemoryStore;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of each store's change feed.
pub(crate) const EVENT_CHANNEL_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// ContextId
// ---------------------------------------------------------------------------

/// Opaque identifier for one execution context sharing a store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContextId(u64);

impl ContextId {
    /// Creates a new `ContextId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{:x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StorageEvent
// ---------------------------------------------------------------------------

/// A mutation of the store, as seen by another context.
///
/// `key` is `None` when the observer cannot tell which keys changed (the
/// whole store was replaced, or the observer fell behind and missed
/// events). Treat that as "re-read everything you care about".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// The context that made the change.
    pub origin: ContextId,
}

impl StorageEvent {
    /// Returns `true` if this event may have changed `key`.
    pub fn touches(&self, key: &str) -> bool {
        self.key.as_deref().is_none_or(|k| k == key)
    }

    /// Returns `true` if this event removed `key`.
    pub fn is_removal_of(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key) && self.new_value.is_none()
    }
}

/// A stream of [`StorageEvent`]s made by contexts other than the
/// subscriber's own.
pub struct StorageEvents {
    own: ContextId,
    rx: broadcast::Receiver<StorageEvent>,
}

impl StorageEvents {
    pub(crate) fn new(
        own: ContextId,
        rx: broadcast::Receiver<StorageEvent>,
    ) -> Self {
        Self { own, rx }
    }

    /// Waits for the next foreign mutation.
    ///
    /// Returns `None` once the store is dropped. If this receiver fell
    /// behind, a single keyless event is returned in place of the missed
    /// ones.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.own => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        context = %self.own,
                        missed,
                        "storage change feed lagged, forcing resync"
                    );
                    return Some(StorageEvent {
                        key: None,
                        old_value: None,
                        new_value: None,
                        origin: self.own,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// A durable string store shared across execution contexts.
///
/// All operations are synchronous: they never wait on the network, so the
/// session manager can call them while holding its own locks.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every key in `keys`.
    ///
    /// Implementations override this so no reader in the same context can
    /// observe a partial removal. The default removes keys one by one.
    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Subscribes to mutations made by other contexts.
    fn subscribe(&self) -> StorageEvents;

    /// The identity of this context.
    fn context_id(&self) -> ContextId;
}

impl<K: KeyValueStore + ?Sized> KeyValueStore for Arc<K> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        (**self).remove_many(keys)
    }

    fn subscribe(&self) -> StorageEvents {
        (**self).subscribe()
    }

    fn context_id(&self) -> ContextId {
        (**self).context_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_display_is_hex() {
        assert_eq!(ContextId::new(255).to_string(), "ctx-ff");
    }

    #[test]
    fn test_storage_event_touches_matching_key() {
        let event = StorageEvent {
            key: Some("a".into()),
            old_value: None,
            new_value: Some("1".into()),
            origin: ContextId::new(1),
        };

        assert!(event.touches("a"));
        assert!(!event.touches("b"));
        assert!(!event.is_removal_of("a"));
    }

    #[test]
    fn test_storage_event_without_key_touches_everything() {
        let event = StorageEvent {
            key: None,
            old_value: None,
            new_value: None,
            origin: ContextId::new(1),
        };

        assert!(event.touches("anything"));
        assert!(!event.is_removal_of("anything"));
    }
}
