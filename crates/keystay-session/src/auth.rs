//! The identity endpoint, as seen by the session manager.
//!
//! The manager needs exactly three calls: fetch the signed-in user's
//! profile, trade a refresh token for a new access token, and sign out.
//! [`AuthClient`] names those calls and nothing else, so tests can swap in
//! a scripted client and production uses
//! [`HttpAuthClient`](crate::HttpAuthClient).

use std::future::Future;
use std::sync::Arc;

use keystay_protocol::{Profile, RefreshResponse};

use crate::AuthError;

/// Outbound calls to the identity endpoint.
///
/// Any non-success response is a failure; there is no partial success.
///
/// # Example
///
/// ```rust
/// use keystay_protocol::{Profile, RefreshResponse};
/// use keystay_session::{AuthClient, AuthError};
///
/// /// Rejects everything. Handy for exercising the signed-out paths.
/// struct Offline;
///
/// impl AuthClient for Offline {
///     async fn fetch_profile(&self, _: &str) -> Result<Profile, AuthError> {
///         Err(AuthError::Transport("offline".into()))
///     }
///
///     async fn refresh(&self, _: &str) -> Result<RefreshResponse, AuthError> {
///         Err(AuthError::Transport("offline".into()))
///     }
///
///     async fn logout(&self, _: &str) -> Result<(), AuthError> {
///         Err(AuthError::Transport("offline".into()))
///     }
/// }
/// ```
pub trait AuthClient: Send + Sync + 'static {
    /// Fetches the profile of the user `access_token` belongs to.
    fn fetch_profile(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<Profile, AuthError>> + Send;

    /// Exchanges `refresh_token` for a new access token (and possibly a new
    /// refresh token).
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshResponse, AuthError>> + Send;

    /// Signs `access_token` out on the server.
    fn logout(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;
}

impl<T: AuthClient> AuthClient for Arc<T> {
    fn fetch_profile(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<Profile, AuthError>> + Send {
        (**self).fetch_profile(access_token)
    }

    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshResponse, AuthError>> + Send {
        (**self).refresh(refresh_token)
    }

    fn logout(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send {
        (**self).logout(access_token)
    }
}
