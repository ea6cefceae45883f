//! Lifecycle event bus for Keystay.
//!
//! The session manager announces every transition it makes (sign-in,
//! sign-out, token refresh, expiry, profile edit) on an [`EventBus`]. UI
//! pieces such as a top bar, a sidebar, or a route guard subscribe to the
//! kinds they care about and never touch the manager's internals.
//!
//! # Delivery rules
//!
//! - Callbacks run synchronously inside [`EventBus::emit`], in the order
//!   they subscribed.
//! - A callback that panics is logged and skipped; the remaining callbacks
//!   still run.
//! - There is no replay. A component mounted after an event fired must read
//!   the current session from the manager.
//!
//! Async consumers can use [`EventBus::stream`] instead of callbacks.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use keystay_protocol::{Profile, Session, TokenPair};
use tokio::sync::broadcast;

/// Capacity of the async event stream.
const STREAM_CHANNEL_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// The closed set of lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Login,
    Logout,
    TokenRefreshed,
    SessionExpired,
    ProfileUpdated,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 5] = [
        Self::Login,
        Self::Logout,
        Self::TokenRefreshed,
        Self::SessionExpired,
        Self::ProfileUpdated,
    ];

    /// The conventional snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::TokenRefreshed => "token_refreshed",
            Self::SessionExpired => "session_expired",
            Self::ProfileUpdated => "profile_updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended through the logout path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user signed out in this context.
    UserRequested,
    /// Another context sharing the store signed out.
    OtherContext,
    /// The profile reported a role this client cannot render.
    InvalidRole,
}

/// A lifecycle transition, with the data each kind carries.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A session was established.
    Login { session: Session },
    /// The session ended on purpose.
    Logout { reason: LogoutReason },
    /// The token pair was replaced.
    TokenRefreshed { tokens: TokenPair },
    /// The session ended because credentials could not be renewed.
    SessionExpired { reason: String },
    /// The signed-in user's profile changed.
    ProfileUpdated { user: Profile },
}

impl LifecycleEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Login { .. } => EventKind::Login,
            Self::Logout { .. } => EventKind::Logout,
            Self::TokenRefreshed { .. } => EventKind::TokenRefreshed,
            Self::SessionExpired { .. } => EventKind::SessionExpired,
            Self::ProfileUpdated { .. } => EventKind::ProfileUpdated,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Callback = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// In-process publish/subscribe keyed by [`EventKind`].
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Callback)>>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(STREAM_CHANNEL_SIZE);
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    /// Subscribes `callback` to events of `kind`.
    ///
    /// Keep the returned id to unsubscribe with [`off`](Self::off).
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        tracing::trace!(%kind, subscription = %id, "subscribed");
        id
    }

    /// Removes the subscription `id` from `kind`.
    ///
    /// Returns `false` if it was not subscribed.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    /// Delivers `event` to every current subscriber of its kind.
    ///
    /// Returns the number of callbacks that completed without panicking.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        let kind = event.kind();

        // Snapshot so callbacks may call `on`/`off` without deadlocking.
        let callbacks: Vec<(SubscriptionId, Callback)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        tracing::debug!(%kind, subscribers = callbacks.len(), "emitting lifecycle event");

        let mut delivered = 0;
        for (id, callback) in &callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(%kind, subscription = %id, "lifecycle subscriber panicked");
                }
            }
        }

        // Nobody streaming is fine.
        let _ = self.stream.send(event);
        delivered
    }

    /// Returns a receiver of every event emitted from now on.
    ///
    /// A receiver that falls more than a few dozen events behind loses the
    /// oldest ones.
    pub fn stream(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.stream.subscribe()
    }

    /// Number of callbacks subscribed to `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired() -> LifecycleEvent {
        LifecycleEvent::SessionExpired {
            reason: "test".into(),
        }
    }

    #[test]
    fn test_event_kind_names_are_snake_case() {
        let names: Vec<&str> = EventKind::ALL.iter().map(EventKind::as_str).collect();

        assert_eq!(
            names,
            ["login", "logout", "token_refreshed", "session_expired", "profile_updated"]
        );
    }

    #[test]
    fn test_event_kind_matches_variant() {
        let event = LifecycleEvent::Logout {
            reason: LogoutReason::UserRequested,
        };

        assert_eq!(event.kind(), EventKind::Logout);
        assert_eq!(expired().kind(), EventKind::SessionExpired);
    }

    #[test]
    fn test_on_returns_unique_ids() {
        let bus = EventBus::new();

        let a = bus.on(EventKind::Login, |_| {});
        let b = bus.on(EventKind::Login, |_| {});

        assert_ne!(a, b);
        assert_eq!(bus.subscriber_count(EventKind::Login), 2);
    }

    #[test]
    fn test_off_unknown_id_returns_false() {
        let bus = EventBus::new();
        let id = bus.on(EventKind::Login, |_| {});

        assert!(!bus.off(EventKind::Logout, id));
        assert!(bus.off(EventKind::Login, id));
        assert!(!bus.off(EventKind::Login, id));
    }

    #[test]
    fn test_emit_without_subscribers_delivers_nothing() {
        let bus = EventBus::new();

        assert_eq!(bus.emit(expired()), 0);
    }

    #[tokio::test]
    async fn test_stream_receives_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.stream();

        bus.emit(expired());

        assert_eq!(rx.recv().await.unwrap(), expired());
    }
}
