//! Unified error type for Keystay.

use keystay_protocol::TokenError;
use keystay_session::{AuthError, SessionError};
use keystay_store::StoreError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` conversions let `?` lift any layer's error into this one.
#[derive(Debug, thiserror::Error)]
pub enum KeystayError {
    /// An access token could not be decoded.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The credential store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The identity endpoint failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
