//! Error types for the protocol layer.
//!
//! Each crate in Keystay defines its own error enum. A `TokenError` always
//! means something was wrong with the shape of a token or a profile payload,
//! never with storage or the network.

/// Errors that can occur while decoding tokens and identity payloads.
///
/// Most callers never see these: [`compute_expiry`](crate::compute_expiry)
/// swallows them and falls back to a conservative lifetime. They surface
/// through [`decode_claims`](crate::decode_claims) for callers that want to
/// know why a token could not be read.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token does not have the `header.payload.signature` shape.
    #[error("malformed token: expected 3 segments, found {0}")]
    Malformed(usize),

    /// The payload segment is not valid base64url.
    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload decoded to bytes that are not a JSON claims object.
    #[error("payload is not a claims object: {0}")]
    Claims(#[from] serde_json::Error),

    /// The claims object has no usable `exp` value.
    #[error("token has no usable exp claim")]
    MissingExpiry,

    /// A profile reported a role outside the recognized set.
    #[error("unknown role: {0}")]
    UnknownRole(String),
}
