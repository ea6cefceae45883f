//! # Keystay
//!
//! Client-side session and auth-token lifecycle for booking front ends.
//!
//! Keystay decides who is signed in, keeps their access token fresh without
//! ever spending a refresh token twice, persists credentials across
//! restarts, keeps every open context of the same client in agreement, and
//! announces each transition as a typed lifecycle event.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keystay::prelude::*;
//!
//! # async fn run() -> Result<(), KeystayError> {
//! let context = SessionContextBuilder::new()
//!     .config(SessionConfig::default())
//!     .start_http(FileStore::open("session.json"))
//!     .await?;
//!
//! context.manager().on(EventKind::SessionExpired, |_| {
//!     // route back to the sign-in page
//! });
//! # Ok(())
//! # }
//! ```

mod context;
mod error;

pub use context::{SessionContext, SessionContextBuilder};
pub use error::KeystayError;

pub use keystay_events as events;
pub use keystay_protocol as protocol;
pub use keystay_session as session;
pub use keystay_store as store;

pub mod prelude {
    pub use crate::{KeystayError, SessionContext, SessionContextBuilder};
    pub use keystay_events::{EventBus, EventKind, LifecycleEvent, LogoutReason, SubscriptionId};
    pub use keystay_protocol::{
        Profile, ProfileUpdate, Role, Session, SessionSummary, TokenPair,
    };
    pub use keystay_session::{
        AuthClient, AuthEndpoints, AuthError, HttpAuthClient, Location, MemoryLocation,
        SessionConfig, SessionError, SessionManager, SessionStatus,
    };
    pub use keystay_store::{FileStore, KeyValueStore, MemoryStore};
}
