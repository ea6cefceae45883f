//! `SessionContext` builder and lifetime.
//!
//! A context is everything one execution context (a window, a process)
//! runs to keep its session current: the manager, the listener that follows
//! other contexts, and optionally the proactive refresher. It is the single
//! object the application creates at startup and hands to its UI.

use std::sync::Arc;

use keystay_events::EventBus;
use keystay_protocol::Session;
use keystay_session::{
    AuthClient, AutoRefresh, ConsistencyListener, HttpAuthClient, ListenerHandle, Location,
    SessionConfig, SessionManager,
};
use keystay_store::KeyValueStore;

use crate::KeystayError;

/// Builder for configuring and starting a [`SessionContext`].
///
/// # Example
///
/// ```rust,no_run
/// use keystay::prelude::*;
///
/// # async fn run() -> Result<(), KeystayError> {
/// let context = SessionContextBuilder::new()
///     .config_json(r#"{"endpoints": {"baseUrl": "https://api.stay.example"}}"#)?
///     .start_http(MemoryStore::new())
///     .await?;
///
/// if let Some(session) = context.session() {
///     println!("signed in as {}", session.user.name);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionContextBuilder {
    config: SessionConfig,
    location: Option<Arc<dyn Location>>,
    events: Option<Arc<EventBus>>,
}

impl SessionContextBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            location: None,
            events: None,
        }
    }

    /// Sets the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Parses the session configuration from JSON.
    ///
    /// # Errors
    /// Returns [`KeystayError::Config`] if `raw` is not a valid config.
    pub fn config_json(self, raw: &str) -> Result<Self, KeystayError> {
        Ok(self.config(SessionConfig::from_json(raw)?))
    }

    /// Sets the location redirect tokens are read from.
    pub fn location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = Some(location);
        self
    }

    /// Shares an existing event bus with the manager.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Starts the context over `client` and `kv` and bootstraps the
    /// session.
    ///
    /// The cross-context listener is running before bootstrap begins, so
    /// no change made by another context is missed.
    pub async fn start<C, K>(self, client: C, kv: K) -> SessionContext<C, K>
    where
        C: AuthClient,
        K: KeyValueStore,
    {
        let auto_refresh = self.config.auto_refresh;
        let mut builder = SessionManager::builder(client, kv).config(self.config);
        if let Some(location) = self.location {
            builder = builder.location(location);
        }
        if let Some(events) = self.events {
            builder = builder.events(events);
        }
        let manager = builder.build();

        let listener = ConsistencyListener::spawn(manager.clone());
        let session = manager.initialize().await;
        let auto_refresh = auto_refresh.then(|| AutoRefresh::spawn(manager.clone()));

        tracing::info!(
            authenticated = session.is_some(),
            auto_refresh = auto_refresh.is_some(),
            "session context started"
        );

        SessionContext {
            manager,
            listener,
            auto_refresh,
        }
    }

    /// [`start`](Self::start) with an [`HttpAuthClient`] built from the
    /// configured endpoints.
    ///
    /// # Errors
    /// Returns [`KeystayError::Auth`] if the HTTP client cannot be built.
    pub async fn start_http<K>(
        self,
        kv: K,
    ) -> Result<SessionContext<HttpAuthClient, K>, KeystayError>
    where
        K: KeyValueStore,
    {
        let client = HttpAuthClient::new(self.config.endpoints.clone())?;
        Ok(self.start(client, kv).await)
    }
}

impl Default for SessionContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running session context.
///
/// Dropping it stops the background tasks; the persisted session stays in
/// the store for the next start.
pub struct SessionContext<C, K: KeyValueStore> {
    manager: SessionManager<C, K>,
    listener: ListenerHandle,
    auto_refresh: Option<AutoRefresh>,
}

impl<C: AuthClient, K: KeyValueStore> SessionContext<C, K> {
    /// The session manager. Clone it to hand it to UI components.
    pub fn manager(&self) -> &SessionManager<C, K> {
        &self.manager
    }

    pub fn session(&self) -> Option<Session> {
        self.manager.session()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.manager.events()
    }

    /// Whether the proactive refresher is running.
    pub fn auto_refresh_running(&self) -> bool {
        self.auto_refresh
            .as_ref()
            .is_some_and(|auto| !auto.is_finished())
    }

    /// Whether the cross-context listener is running.
    pub fn listening(&self) -> bool {
        !self.listener.is_finished()
    }

    /// Stops the background tasks. The session itself stays as it is.
    pub fn shutdown(&self) {
        tracing::debug!("session context shutting down");
        self.listener.stop();
        if let Some(auto_refresh) = &self.auto_refresh {
            auto_refresh.stop();
        }
    }
}
