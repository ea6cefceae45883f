//! Error types for the session layer.
//!
//! Both enums are `Clone`: a single refresh outcome is handed to every
//! caller that was waiting on it, so the error has to be copyable.

/// Errors returned by an [`AuthClient`](crate::AuthClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The endpoint answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}")]
    Status {
        endpoint: &'static str,
        status: u16,
    },

    /// The request never produced a response (connect error, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    /// The response body was not what the endpoint promised.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The profile reported a role outside the recognized set.
    #[error("profile has unknown role: {0}")]
    InvalidRole(String),
}

/// Errors that can occur during session management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// There is no session (or no refresh token) to act on.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The refresh call failed. The session has been expired.
    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] AuthError),

    /// Fetching the profile failed while establishing a session.
    #[error("profile fetch failed: {0}")]
    ProfileFetch(#[source] AuthError),
}

impl SessionError {
    /// Returns `true` if the failure was an unrecognized profile role.
    pub fn is_invalid_role(&self) -> bool {
        matches!(self, Self::ProfileFetch(AuthError::InvalidRole(_)))
    }
}
