//! The session manager: the single owner of "who is signed in".
//!
//! Responsibilities:
//! - Bootstrapping a session from redirect tokens or persisted credentials
//! - Refreshing tokens (single-flight) and persisting the result
//! - Local profile edits, sign-in and sign-out
//! - Adopting changes another context made to the shared store
//!
//! Every transition is announced on the [`EventBus`].
//!
//! # Concurrency note
//!
//! The current session lives behind a `std::sync::RwLock` that is never
//! held across an `.await`; the only await points are calls to the
//! [`AuthClient`]. Bootstrap is serialized by its own async mutex so that
//! concurrent first callers trigger a single profile fetch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use futures_util::FutureExt;
use keystay_events::{EventBus, EventKind, LifecycleEvent, LogoutReason, SubscriptionId};
use keystay_protocol::{Profile, ProfileUpdate, Session, SessionSummary, TokenPair};
use keystay_store::{CredentialStore, KeyValueStore, StorageEvent, StorageEvents, TOKENS_KEY};

use crate::location::take_url_tokens;
use crate::{
    AuthClient, Location, MemoryLocation, RefreshCoordinator, SessionConfig, SessionError,
    SessionStatus,
};

/// The manager's view of the current session.
enum SessionState {
    Unbootstrapped,
    Authenticated(Session),
    Unauthenticated,
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            Self::Unbootstrapped => SessionStatus::Unbootstrapped,
            Self::Authenticated(_) => SessionStatus::Authenticated,
            Self::Unauthenticated => SessionStatus::Unauthenticated,
        }
    }
}

struct Inner<C, K: KeyValueStore> {
    client: C,
    store: CredentialStore<K>,
    events: Arc<EventBus>,
    location: Arc<dyn Location>,
    config: SessionConfig,
    state: RwLock<SessionState>,
    /// Bumped on every state transition; only written under `state`'s lock.
    generation: AtomicU64,
    refresh: RefreshCoordinator<TokenPair, SessionError>,
    bootstrap: tokio::sync::Mutex<()>,
}

/// Owns the session lifecycle for one execution context.
///
/// Cloning is cheap: clones share the same state, so a clone can be handed
/// to background tasks (see [`ConsistencyListener`](crate::ConsistencyListener)
/// and [`AutoRefresh`](crate::AutoRefresh)).
///
/// ## Lifecycle
///
/// ```text
/// initialize() ──→ [Authenticated] ──refresh_tokens()──→ [Authenticated]
///      │                 │       │
///      │           logout()    refresh fails / other context signs out
///      ▼                 ▼       ▼
/// [Unauthenticated] ←────┴───────┘
///      │
///      └──login()──→ [Authenticated]
/// ```
pub struct SessionManager<C, K: KeyValueStore> {
    inner: Arc<Inner<C, K>>,
}

impl<C, K: KeyValueStore> Clone for SessionManager<C, K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: AuthClient, K: KeyValueStore> SessionManager<C, K> {
    /// Creates a manager with default config, no location, and its own
    /// event bus.
    pub fn new(client: C, kv: K) -> Self {
        Self::builder(client, kv).build()
    }

    pub fn builder(client: C, kv: K) -> SessionManagerBuilder<C, K> {
        SessionManagerBuilder {
            client,
            kv,
            config: SessionConfig::default(),
            location: None,
            events: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The current session, if signed in.
    pub fn session(&self) -> Option<Session> {
        match &*self.inner.read_state() {
            SessionState::Authenticated(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// The signed-in user's profile.
    pub fn user(&self) -> Option<Profile> {
        match &*self.inner.read_state() {
            SessionState::Authenticated(session) => Some(session.user.clone()),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.read_state().status()
    }

    /// The persisted summary, readable before bootstrap finishes.
    ///
    /// For display only; it may be stale or belong to a session that is
    /// about to be rejected.
    pub fn cached_summary(&self) -> Option<SessionSummary> {
        self.inner.store.load_summary()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Subscribes `callback` to lifecycle events of `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, callback)
    }

    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.inner.events.off(kind, id)
    }

    /// Subscribes to credential changes made by other contexts.
    pub fn storage_events(&self) -> StorageEvents {
        self.inner.store.kv().subscribe()
    }

    /// Returns `true` while a token refresh is pending.
    pub fn refresh_in_flight(&self) -> bool {
        self.inner.refresh.in_flight()
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    /// Establishes the session for this context, once.
    ///
    /// Redirect tokens in the current location win over persisted ones; the
    /// token parameters are stripped from the location as soon as they are
    /// read. Concurrent and repeated calls resolve to the same outcome
    /// without repeating any network call. Failures are never returned:
    /// they leave the manager `Unauthenticated` with storage cleared.
    pub async fn initialize(&self) -> Option<Session> {
        let _guard = self.inner.bootstrap.lock().await;
        if self.status() != SessionStatus::Unbootstrapped {
            return self.session();
        }

        match self.take_redirect_tokens() {
            Some(tokens) => {
                tracing::info!("bootstrapping from redirect tokens");
                self.establish_or_abandon(tokens).await.ok()
            }
            None => self.restore_from_storage().await,
        }
    }

    /// Alias of [`initialize`](Self::initialize).
    pub async fn bootstrap(&self) -> Option<Session> {
        self.initialize().await
    }

    /// Rebuilds the session from persisted credentials.
    ///
    /// Refreshes first when the stored access token is near expiry, then
    /// fetches the profile. Ends `Authenticated` or, on any failure,
    /// `Unauthenticated` with storage cleared.
    pub async fn restore_from_storage(&self) -> Option<Session> {
        let Some(stored) = self.inner.store.load() else {
            tracing::debug!("no stored credentials");
            self.inner.write_state_if_unbootstrapped(SessionState::Unauthenticated);
            return None;
        };

        let tokens = if stored.is_near_expiry_within(self.inner.config.expiry_buffer()) {
            tracing::debug!(expires_at = %stored.expires_at(), "stored access token near expiry");
            // A failed refresh has already cleared storage and expired.
            self.refresh_tokens().await.ok()?
        } else {
            stored
        };

        self.establish_or_abandon(tokens).await.ok()
    }

    /// Signs in with a freshly issued token pair.
    ///
    /// # Errors
    /// Returns [`SessionError::ProfileFetch`] when the profile cannot be
    /// loaded; the tokens are discarded in that case.
    pub async fn login(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Session, SessionError> {
        let tokens = TokenPair::new_at(
            access_token,
            refresh_token,
            Utc::now(),
            self.inner.config.fallback_lifetime(),
        );
        self.establish_or_abandon(tokens).await
    }

    fn take_redirect_tokens(&self) -> Option<TokenPair> {
        let url = self.inner.location.current()?;
        let found = take_url_tokens(
            &url,
            &self.inner.config.access_token_param,
            &self.inner.config.refresh_token_param,
        );
        if let Some(stripped) = found.stripped {
            tracing::debug!("removing credentials from location");
            self.inner.location.replace(stripped);
        }
        let (access, refresh) = found.tokens?;
        Some(TokenPair::new_at(
            access,
            refresh,
            Utc::now(),
            self.inner.config.fallback_lifetime(),
        ))
    }

    /// Persists `tokens`, fetches the profile, and installs the session.
    async fn establish_or_abandon(&self, tokens: TokenPair) -> Result<Session, SessionError> {
        self.inner.persist_tokens(&tokens);
        match self.inner.client.fetch_profile(tokens.access_token()).await {
            Ok(user) => Ok(self.inner.install(user, tokens)),
            Err(e) => {
                let error = SessionError::ProfileFetch(e);
                self.inner.abandon(&error);
                Err(error)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tokens
    // -----------------------------------------------------------------------

    /// Exchanges the refresh token for a new pair.
    ///
    /// Concurrent callers share one network call and one outcome. On
    /// failure the session is expired (storage cleared, `session_expired`
    /// emitted once) before the error is returned.
    pub async fn refresh_tokens(&self) -> Result<TokenPair, SessionError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .refresh
            .run(move || async move { inner.perform_refresh().await }.boxed())
            .await
    }

    /// Returns an access token that is not near expiry, refreshing first
    /// if needed.
    pub async fn access_token(&self) -> Result<String, SessionError> {
        let tokens = self
            .session()
            .map(|session| session.tokens)
            .ok_or(SessionError::NotAuthenticated)?;
        if tokens.is_near_expiry_within(self.inner.config.expiry_buffer()) {
            let fresh = self.refresh_tokens().await?;
            return Ok(fresh.access_token().to_string());
        }
        Ok(tokens.access_token().to_string())
    }

    // -----------------------------------------------------------------------
    // Profile and sign-out
    // -----------------------------------------------------------------------

    /// Shallow-merges `update` into the current profile.
    ///
    /// # Errors
    /// Returns [`SessionError::NotAuthenticated`] if nobody is signed in.
    pub fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, SessionError> {
        let user = {
            let mut state = self.inner.write_state();
            let SessionState::Authenticated(session) = &mut *state else {
                return Err(SessionError::NotAuthenticated);
            };
            session.user.merge(update);
            session.user.clone()
        };

        self.inner.persist_summary(&SessionSummary::from(&user));
        tracing::info!(user_id = %user.id, "profile updated");
        self.inner.events.emit(LifecycleEvent::ProfileUpdated { user: user.clone() });
        Ok(user)
    }

    /// Signs out.
    ///
    /// The remote sign-out is best effort: its failure is logged and local
    /// cleanup proceeds. Always ends `Unauthenticated` and emits `logout`.
    pub async fn logout(&self) {
        let access_token = self
            .session()
            .map(|session| session.tokens)
            .or_else(|| self.inner.store.load())
            .map(|tokens| tokens.access_token().to_string());

        if let Some(token) = access_token {
            if let Err(e) = self.inner.client.logout(&token).await {
                tracing::warn!(error = %e, "remote sign-out failed, signing out locally");
            }
        }

        self.inner.clear_storage();
        self.inner.end(LogoutReason::UserRequested);
    }

    // -----------------------------------------------------------------------
    // Cross-context changes
    // -----------------------------------------------------------------------

    /// Reconciles local state with a change another context made.
    ///
    /// Credentials removed elsewhere end the local session (no remote call,
    /// no storage writes). Credentials rewritten elsewhere (another context
    /// refreshed) are adopted in memory. Changes to other keys are ignored.
    pub fn apply_external_change(&self, event: &StorageEvent) {
        if !event.touches(TOKENS_KEY) {
            return;
        }

        let stored = match (&event.key, &event.new_value) {
            (Some(_), None) => None,
            (Some(_), Some(raw)) => match CredentialStore::<K>::decode_tokens(raw) {
                Some(tokens) => Some(tokens),
                // Unreadable write; keep what we have.
                None => return,
            },
            (None, _) => self.inner.store.load(),
        };

        match stored {
            None => {
                if self.is_authenticated() {
                    tracing::info!(origin = %event.origin, "credentials cleared by another context");
                    self.inner.end(LogoutReason::OtherContext);
                }
            }
            Some(tokens) => self.inner.adopt(tokens),
        }
    }
}

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

impl<C: AuthClient, K: KeyValueStore> Inner<C, K> {
    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state_if_unbootstrapped(&self, next: SessionState) {
        let mut state = self.write_state();
        if matches!(*state, SessionState::Unbootstrapped) {
            self.enter(&mut state, next);
        }
    }

    /// Moves to `next` and invalidates any refresh started from the previous
    /// state: its result will be discarded and later callers start afresh.
    /// Must be called with the state write lock held.
    fn enter(&self, state: &mut SessionState, next: SessionState) {
        *state = next;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.refresh.detach();
    }

    /// The body of one refresh. Runs at most once per single-flight round.
    async fn perform_refresh(&self) -> Result<TokenPair, SessionError> {
        let Some((generation, current)) = self.refreshable_tokens() else {
            tracing::debug!("refresh requested without credentials");
            return Err(SessionError::NotAuthenticated);
        };

        tracing::debug!("refreshing access token");
        let outcome = self.client.refresh(current.refresh_token()).await;

        let tokens = {
            let mut state = self.write_state();
            // Signed out, or signed in again, while the call was in flight.
            if self.generation.load(Ordering::Acquire) != generation {
                tracing::debug!("discarding refresh result from an earlier session");
                return Err(match outcome {
                    Ok(_) => SessionError::NotAuthenticated,
                    Err(e) => SessionError::RefreshFailed(e),
                });
            }

            match outcome {
                Ok(response) => {
                    let tokens = current.rotate(response, self.config.fallback_lifetime());
                    self.persist_tokens(&tokens);
                    if let SessionState::Authenticated(session) = &mut *state {
                        session.tokens = tokens.clone();
                        self.persist_summary(&session.summary());
                    }
                    tokens
                }
                Err(e) => {
                    self.clear_storage();
                    self.enter(&mut state, SessionState::Unauthenticated);
                    drop(state);
                    self.announce_expiry(&e.to_string());
                    return Err(SessionError::RefreshFailed(e));
                }
            }
        };

        tracing::info!(expires_at = %tokens.expires_at(), "access token refreshed");
        self.events.emit(LifecycleEvent::TokenRefreshed {
            tokens: tokens.clone(),
        });
        Ok(tokens)
    }

    /// The pair a refresh should start from, tagged with the state
    /// generation it was read in. Before bootstrap finishes that is whatever
    /// is stored; after sign-out there is none.
    fn refreshable_tokens(&self) -> Option<(u64, TokenPair)> {
        let state = self.read_state();
        let generation = self.generation.load(Ordering::Acquire);
        let tokens = match &*state {
            SessionState::Authenticated(session) => Some(session.tokens.clone()),
            SessionState::Unbootstrapped => self.store.load(),
            SessionState::Unauthenticated => None,
        };
        tokens.map(|tokens| (generation, tokens))
    }

    /// Enters `Authenticated` and announces it.
    fn install(&self, user: Profile, tokens: TokenPair) -> Session {
        let session = Session::new(user, tokens);
        self.persist_summary(&session.summary());
        {
            let mut state = self.write_state();
            self.enter(&mut state, SessionState::Authenticated(session.clone()));
        }

        tracing::info!(user_id = %session.user.id, role = %session.role, "session established");
        self.events.emit(LifecycleEvent::Login {
            session: session.clone(),
        });
        session
    }

    /// Takes over a token pair another context wrote.
    fn adopt(&self, tokens: TokenPair) {
        {
            let mut state = self.write_state();
            let SessionState::Authenticated(session) = &mut *state else {
                return;
            };
            if session.tokens == tokens {
                return;
            }
            session.tokens = tokens.clone();
        }
        tracing::debug!(expires_at = %tokens.expires_at(), "adopted tokens from another context");
        self.events.emit(LifecycleEvent::TokenRefreshed { tokens });
    }

    /// Gives up on establishing a session after `error`.
    fn abandon(&self, error: &SessionError) {
        self.clear_storage();
        if error.is_invalid_role() {
            tracing::warn!(error = %error, "rejecting session with unknown role");
            self.end(LogoutReason::InvalidRole);
        } else {
            self.expire(&error.to_string());
        }
    }

    /// Clears credentials and announces the expiry.
    fn expire(&self, reason: &str) {
        self.clear_storage();
        {
            let mut state = self.write_state();
            self.enter(&mut state, SessionState::Unauthenticated);
        }
        self.announce_expiry(reason);
    }

    fn announce_expiry(&self, reason: &str) {
        tracing::warn!(reason, "session expired");
        self.events.emit(LifecycleEvent::SessionExpired {
            reason: reason.to_string(),
        });
    }

    /// Drops the in-memory session and announces the logout. Storage is
    /// left to the caller.
    fn end(&self, reason: LogoutReason) {
        {
            let mut state = self.write_state();
            self.enter(&mut state, SessionState::Unauthenticated);
        }
        tracing::info!(?reason, "signed out");
        self.events.emit(LifecycleEvent::Logout { reason });
    }

    fn persist_tokens(&self, tokens: &TokenPair) {
        if let Err(e) = self.store.save(tokens) {
            tracing::warn!(error = %e, "failed to persist tokens");
        }
    }

    fn persist_summary(&self, summary: &SessionSummary) {
        if let Err(e) = self.store.save_summary(summary) {
            tracing::warn!(error = %e, "failed to persist session summary");
        }
    }

    fn clear_storage(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear stored credentials");
        }
    }
}

impl<C, K: KeyValueStore> fmt::Debug for SessionManager<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status();
        f.debug_struct("SessionManager")
            .field("status", &status)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SessionManagerBuilder
// ---------------------------------------------------------------------------

/// Builder for [`SessionManager`].
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use keystay_session::{HttpAuthClient, MemoryLocation, SessionConfig, SessionManager};
/// use keystay_store::MemoryStore;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SessionConfig::default();
/// let client = HttpAuthClient::new(config.endpoints.clone())?;
/// let manager = SessionManager::builder(client, MemoryStore::new())
///     .config(config)
///     .location(Arc::new(MemoryLocation::empty()))
///     .build();
/// # Ok(())
/// # }
/// ```
pub struct SessionManagerBuilder<C, K> {
    client: C,
    kv: K,
    config: SessionConfig,
    location: Option<Arc<dyn Location>>,
    events: Option<Arc<EventBus>>,
}

impl<C: AuthClient, K: KeyValueStore> SessionManagerBuilder<C, K> {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Where redirect tokens are read from. Defaults to no location.
    pub fn location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = Some(location);
        self
    }

    /// Shares an existing event bus instead of creating one.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> SessionManager<C, K> {
        let store = CredentialStore::with_fallback_lifetime(
            self.kv,
            self.config.fallback_lifetime(),
        );
        let location = self
            .location
            .unwrap_or_else(|| Arc::new(MemoryLocation::empty()));
        let events = self.events.unwrap_or_default();

        SessionManager {
            inner: Arc::new(Inner {
                client: self.client,
                store,
                events,
                location,
                config: self.config,
                state: RwLock::new(SessionState::Unbootstrapped),
                generation: AtomicU64::new(0),
                refresh: RefreshCoordinator::new(),
                bootstrap: tokio::sync::Mutex::new(()),
            }),
        }
    }
}
