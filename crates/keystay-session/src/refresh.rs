//! Single-flight execution of the token refresh.
//!
//! Refresh tokens are often single-use: if two requests notice an expired
//! access token at the same moment and both call the refresh endpoint, the
//! second call presents a token the first one already spent, and the user
//! is signed out for no reason. [`RefreshCoordinator`] makes every caller
//! that arrives while a refresh is pending wait on that same refresh and
//! receive its outcome.
//!
//! ```text
//!   caller A ──run──→ [no pending] → start op #1 ──┐
//!   caller B ──run──→ [pending #1] ───────attach───┤
//!   caller C ──run──→ [pending #1] ───────attach───┤
//!                                                  ▼
//!                                   op #1 settles, handle cleared
//!   caller D ──run──→ [no pending] → start op #2
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

type SharedOp<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// The one pending operation, tagged so a late finisher cannot clear a
/// newer one.
struct Pending<T, E> {
    id: u64,
    op: SharedOp<T, E>,
}

/// Collapses concurrent calls into a single in-flight operation.
pub struct RefreshCoordinator<T, E> {
    pending: Mutex<Option<Pending<T, E>>>,
    next_id: AtomicU64,
}

impl<T, E> RefreshCoordinator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Runs the operation built by `start`, or joins the one already
    /// pending.
    ///
    /// `start` is only invoked when no operation is pending. Every caller
    /// gets a clone of the same result.
    ///
    /// Dropping the returned future does not cancel the operation for the
    /// other waiters; whoever polls it next drives it forward.
    pub async fn run<F>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, E>>,
    {
        let (id, op) = self.attach_or_start(start);
        let outcome = op.await;
        self.settle(id);
        outcome
    }

    /// Returns `true` while an operation is pending.
    pub fn in_flight(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|pending| pending.op.peek().is_none())
    }

    /// Forgets the pending operation without cancelling it.
    ///
    /// Callers already waiting still receive its outcome; the next
    /// [`run`](Self::run) starts a new operation.
    pub fn detach(&self) {
        if let Some(current) = self.lock().take() {
            tracing::trace!(op = current.id, "detaching pending refresh");
        }
    }

    fn attach_or_start<F>(&self, start: F) -> (u64, SharedOp<T, E>)
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, E>>,
    {
        let mut pending = self.lock();

        // A settled handle whose waiters have not cleared it yet is stale.
        if let Some(current) = pending.as_ref() {
            if current.op.peek().is_none() {
                tracing::trace!(op = current.id, "joining pending refresh");
                return (current.id, current.op.clone());
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = start().shared();
        *pending = Some(Pending { id, op: op.clone() });
        tracing::trace!(op = id, "starting refresh");
        (id, op)
    }

    fn settle(&self, id: u64) {
        let mut pending = self.lock();
        if pending.as_ref().is_some_and(|current| current.id == id) {
            *pending = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Pending<T, E>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> Default for RefreshCoordinator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for RefreshCoordinator<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator").finish_non_exhaustive()
    }
}
