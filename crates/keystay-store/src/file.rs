//! JSON file store with a polling change watcher.
//!
//! Several client processes on one machine can point a `FileStore` at the
//! same path. There is no OS-level notification we can rely on everywhere,
//! so every write stamps the file with a monotonically increasing `version`
//! and the id of the writing context. [`FileStore::watch`] polls that stamp
//! and turns foreign changes into [`StorageEvent`]s.
//!
//! Each store remembers the last snapshot it accounted for. Both the watcher
//! and every write diff the file against it first, so a foreign change is
//! reported even when this context writes before the next poll.
//!
//! ```text
//! { "version": 7, "writer": 9241553, "entries": { "keystay.tokens": "..." } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::{
    ContextId, EVENT_CHANNEL_SIZE, KeyValueStore, StorageEvent, StorageEvents,
    StoreError,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Snapshot {
    version: u64,
    writer: Option<ContextId>,
    entries: BTreeMap<String, String>,
}

/// A [`KeyValueStore`] backed by one JSON file.
pub struct FileStore {
    path: PathBuf,
    id: ContextId,
    /// The last snapshot this context has reported or written. Holding the
    /// lock serializes read-modify-write cycles within this process.
    seen: Arc<Mutex<Snapshot>>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStore {
    /// Opens (without creating) the store at `path` under a fresh random
    /// context id.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let seen = read_snapshot(&path).unwrap_or_default();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            path,
            id: ContextId::new(rand::rng().random()),
            seen: Arc::new(Mutex::new(seen)),
            events,
        }
    }

    /// The file this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts polling the file every `interval` for changes made by other
    /// contexts. Events are delivered to this store's subscribers.
    ///
    /// Must be called from within a Tokio runtime. Abort the returned handle
    /// to stop watching.
    pub fn watch(&self, interval: Duration) -> JoinHandle<()> {
        let path = self.path.clone();
        let own = self.id;
        let events = self.events.clone();
        let seen = Arc::clone(&self.seen);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let polled = {
                    let mut seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
                    catch_up(&path, &mut seen, own, &events)
                };
                if let Err(e) = polled {
                    tracing::debug!(path = %path.display(), error = %e, "file store poll failed");
                }
            }
        })
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>) -> Vec<StorageEvent>,
    ) -> Result<(), StoreError> {
        let mut seen = self.seen.lock().map_err(|_| StoreError::Poisoned)?;
        catch_up(&self.path, &mut seen, self.id, &self.events)?;

        let mut snapshot = seen.clone();
        let changes = apply(&mut snapshot.entries);
        if changes.is_empty() {
            return Ok(());
        }
        snapshot.version += 1;
        snapshot.writer = Some(self.id);
        write_snapshot(&self.path, &snapshot)?;
        *seen = snapshot;
        for event in changes {
            let _ = self.events.send(event);
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(read_snapshot(&self.path)?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let origin = self.id;
        self.mutate(|entries| {
            let old = entries.insert(key.to_string(), value.to_string());
            vec![StorageEvent {
                key: Some(key.to_string()),
                old_value: old,
                new_value: Some(value.to_string()),
                origin,
            }]
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.remove_many(&[key])
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let origin = self.id;
        self.mutate(|entries| {
            keys.iter()
                .filter_map(|key| {
                    entries.remove(*key).map(|old| StorageEvent {
                        key: Some(key.to_string()),
                        old_value: Some(old),
                        new_value: None,
                        origin,
                    })
                })
                .collect()
        })
    }

    fn subscribe(&self) -> StorageEvents {
        StorageEvents::new(self.id, self.events.subscribe())
    }

    fn context_id(&self) -> ContextId {
        self.id
    }
}

/// Reads the snapshot at `path`. A missing file is an empty store.
fn read_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(Snapshot::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Reports what other contexts changed since `seen` and advances `seen` to
/// the file's current contents.
fn catch_up(
    path: &Path,
    seen: &mut Snapshot,
    own: ContextId,
    events: &broadcast::Sender<StorageEvent>,
) -> Result<(), StoreError> {
    let current = read_snapshot(path)?;
    if current.version == seen.version {
        return Ok(());
    }
    let origin = current.writer.unwrap_or(own);
    if origin != own {
        for event in diff(seen, &current, origin) {
            let _ = events.send(event);
        }
    }
    *seen = current;
    Ok(())
}

/// Writes the snapshot atomically (write a unique temp file, then rename).
///
/// The temp name carries the PID and a counter so concurrent writers never
/// share a temp file.
fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(snapshot)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Per-key differences between two snapshots, attributed to `origin`.
fn diff(before: &Snapshot, after: &Snapshot, origin: ContextId) -> Vec<StorageEvent> {
    let mut events = Vec::new();
    for (key, new) in &after.entries {
        let old = before.entries.get(key);
        if old != Some(new) {
            events.push(StorageEvent {
                key: Some(key.clone()),
                old_value: old.cloned(),
                new_value: Some(new.clone()),
                origin,
            });
        }
    }
    for (key, old) in &before.entries {
        if !after.entries.contains_key(key) {
            events.push(StorageEvent {
                key: Some(key.clone()),
                old_value: Some(old.clone()),
                new_value: None,
                origin,
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_on_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store.json"));

        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_set_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        FileStore::open(&path).set("k", "v").unwrap();

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_set_bumps_version_and_stamps_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path);

        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();

        let snapshot = read_snapshot(&path).unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.writer, Some(store.context_id()));
    }

    #[test]
    fn test_remove_many_of_missing_keys_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path);

        store.remove_many(&["a", "b"]).unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_surfaces_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = FileStore::open(&path).get("k");

        assert!(matches!(result, Err(StoreError::Serde(_))));
    }

    #[test]
    fn test_diff_reports_changes_and_removals() {
        let mut before = Snapshot::default();
        before.entries.insert("kept".into(), "1".into());
        before.entries.insert("gone".into(), "x".into());
        let mut after = before.clone();
        after.entries.remove("gone");
        after.entries.insert("kept".into(), "2".into());

        let events = diff(&before, &after, ContextId::new(7));

        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.is_removal_of("gone")));
        assert!(
            events
                .iter()
                .any(|e| e.key.as_deref() == Some("kept") && e.new_value.as_deref() == Some("2"))
        );
    }

    #[tokio::test]
    async fn test_watch_reports_writes_from_other_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let watcher = FileStore::open(&path);
        let writer = FileStore::open(&path);
        let mut events = watcher.subscribe();
        let handle = watcher.watch(Duration::from_millis(10));

        writer.set("k", "v").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("watcher should notice the write")
            .expect("feed open");
        assert_eq!(event.key.as_deref(), Some("k"));
        assert_eq!(event.origin, writer.context_id());
        handle.abort();
    }

    #[tokio::test]
    async fn test_foreign_removal_survives_own_write_before_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let tab_a = FileStore::open(&path);
        tab_a.set("keystay.tokens", "t-1").unwrap();
        let tab_b = FileStore::open(&path);
        let mut events = tab_b.subscribe();
        let handle = tab_b.watch(Duration::from_millis(200));

        tab_a.remove("keystay.tokens").unwrap();
        tab_b.set("keystay.session", "{}").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("removal should be reported")
            .expect("feed open");
        assert!(event.is_removal_of("keystay.tokens"));
        assert_eq!(event.origin, tab_a.context_id());
        assert_eq!(tab_b.get("keystay.tokens").unwrap(), None);
        handle.abort();
    }

    #[test]
    fn test_write_keeps_foreign_changes_made_since_last_look() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let tab_a = FileStore::open(&path);
        let tab_b = FileStore::open(&path);

        tab_a.set("a", "1").unwrap();
        tab_b.set("b", "2").unwrap();

        let snapshot = read_snapshot(&path).unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.entries.get("a").map(String::as_str), Some("1"));
        assert_eq!(snapshot.entries.get("b").map(String::as_str), Some("2"));
    }
}
