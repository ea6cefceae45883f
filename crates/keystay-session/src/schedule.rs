//! Proactive token refresh.
//!
//! Without it, tokens are refreshed lazily: at bootstrap, or when
//! [`SessionManager::access_token`] finds them near expiry. [`AutoRefresh`]
//! refreshes shortly before expiry so an idle context wakes up with a
//! usable token.

use std::time::Duration;

use chrono::Utc;
use keystay_events::{EventKind, LifecycleEvent};
use keystay_store::KeyValueStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::{AuthClient, SessionManager};

/// Floor on the wait between two refreshes, so a server that keeps issuing
/// already-expiring tokens cannot drive a hot loop.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// A background task that refreshes the access token ahead of expiry.
///
/// While signed in, the task sleeps until `expires_at - buffer` and then
/// refreshes, unless another caller (or another context) already replaced
/// the token in the meantime. While signed out it waits for the next
/// `login` event. Refresh failures are not retried: a failed refresh
/// already expired the session.
#[derive(Debug)]
pub struct AutoRefresh {
    task: JoinHandle<()>,
}

impl AutoRefresh {
    pub fn spawn<C, K>(manager: SessionManager<C, K>) -> Self
    where
        C: AuthClient,
        K: KeyValueStore,
    {
        let task = tokio::spawn(run(manager));
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<C: AuthClient, K: KeyValueStore>(manager: SessionManager<C, K>) {
    let mut events = manager.events().stream();
    let buffer = manager.config().expiry_buffer();

    loop {
        let Some(session) = manager.session() else {
            if !wait_for_login(&mut events).await {
                tracing::debug!("event stream closed, auto refresh stopping");
                return;
            }
            continue;
        };

        let wait = session
            .tokens
            .expires_at()
            .checked_sub_signed(buffer)
            .and_then(|due| (due - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
            .max(MIN_REFRESH_INTERVAL);
        tracing::debug!(wait_secs = wait.as_secs(), "next proactive refresh scheduled");
        tokio::time::sleep(wait).await;

        // Someone else refreshed (or signed out) while we slept.
        let unchanged = manager
            .session()
            .is_some_and(|current| current.tokens == session.tokens);
        if !unchanged {
            continue;
        }

        if let Err(e) = manager.refresh_tokens().await {
            tracing::debug!(error = %e, "proactive refresh failed");
        }
    }
}

/// Returns `false` once no more events can arrive.
async fn wait_for_login(
    events: &mut tokio::sync::broadcast::Receiver<LifecycleEvent>,
) -> bool {
    loop {
        match events.recv().await {
            Ok(event) if event.kind() == EventKind::Login => return true,
            Ok(_) => {}
            // Missed events may include the login; re-check the session.
            Err(RecvError::Lagged(_)) => return true,
            Err(RecvError::Closed) => return false,
        }
    }
}
