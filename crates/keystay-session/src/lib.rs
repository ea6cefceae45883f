//! Session lifecycle management for Keystay.
//!
//! This crate decides who is signed in and keeps that answer correct over
//! time:
//!
//! 1. **Authentication calls**: the [`AuthClient`] trait, with an HTTP
//!    implementation ([`HttpAuthClient`], feature `http`)
//! 2. **Session tracking**: [`SessionManager`], the state machine that
//!    bootstraps, refreshes, and ends sessions
//! 3. **Single-flight refresh**: [`RefreshCoordinator`], so concurrent
//!    callers never spend the same refresh token twice
//! 4. **Cross-context consistency**: [`ConsistencyListener`] follows sign-outs
//!    and refreshes made by other contexts sharing the store
//! 5. **Proactive refresh**: [`AutoRefresh`]
//!
//! # How it fits in the stack
//!
//! ```text
//! Application (above)  ← reads the session, subscribes to lifecycle events
//!     ↕
//! Session Layer (this crate)  ← owns the session state machine
//!     ↕
//! Store + Events (below)  ← persistence, change feeds, event delivery
//!     ↕
//! Protocol (bottom)  ← token codec and shared types
//! ```

mod auth;
mod error;
#[cfg(feature = "http")]
mod http;
mod listener;
mod location;
mod manager;
mod refresh;
mod schedule;
mod session;

pub use auth::AuthClient;
pub use error::{AuthError, SessionError};
#[cfg(feature = "http")]
pub use http::HttpAuthClient;
pub use listener::{ConsistencyListener, ListenerHandle};
pub use location::{Location, MemoryLocation};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use refresh::RefreshCoordinator;
pub use schedule::{AutoRefresh, MIN_REFRESH_INTERVAL};
pub use session::{AuthEndpoints, MAX_DURATION_SECS, SessionConfig, SessionStatus};
