//! Keeps one context's session in step with the others.
//!
//! Several contexts (windows, processes) share one credential store. When
//! one of them signs out, the rest must follow without calling the remote
//! sign-out again; when one of them refreshes, the rest adopt the new pair
//! instead of spending the now-rotated refresh token themselves.

use keystay_store::KeyValueStore;
use tokio::task::JoinHandle;

use crate::{AuthClient, SessionManager};

/// Spawns the task that feeds foreign storage changes into a manager.
pub struct ConsistencyListener;

impl ConsistencyListener {
    /// Subscribes to `manager`'s store and applies every change another
    /// context makes.
    ///
    /// The subscription is taken before this returns, so no change made
    /// after the call is missed. The task stops when the returned handle is
    /// dropped or the store's change feed closes.
    pub fn spawn<C, K>(manager: SessionManager<C, K>) -> ListenerHandle
    where
        C: AuthClient,
        K: KeyValueStore,
    {
        let mut feed = manager.storage_events();
        let task = tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                tracing::trace!(key = ?event.key, origin = %event.origin, "foreign storage change");
                manager.apply_external_change(&event);
            }
            tracing::debug!("storage change feed closed");
        });
        ListenerHandle { task }
    }
}

/// Owns the listener task. Dropping it stops the task.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stops the listener.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
