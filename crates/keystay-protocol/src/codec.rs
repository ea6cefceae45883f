//! Access-token claim codec.
//!
//! An access token is a JWT: three base64url segments joined by dots
//! (`header.payload.signature`). We only ever look at the payload, and only
//! to learn WHEN the token expires so the client can refresh ahead of time.
//!
//! Nothing here validates the signature. The issuer signs tokens and the API
//! server checks them; a client that trusted its own decoding for
//! authorization would be wrong. The expiry we read is a scheduling hint.
//!
//! ```text
//! eyJhbGciOi...  .  eyJleHAiOjE3...  .  SflKxwRJSM...
//!    header            payload           signature
//!                   (we decode this)
//! ```

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::Deserialize;

use crate::TokenError;

/// Lifetime assumed for a token whose expiry cannot be decoded (15 minutes).
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 15 * 60;

/// How close to expiry a token must be before we refresh it (60 seconds).
///
/// A request started with a token that has a few seconds left can be
/// rejected mid-flight; refreshing one minute early avoids that window.
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// base64url that accepts payloads with or without `=` padding.
///
/// JWTs are specified without padding, but some issuers pad anyway.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// The subset of JWT claims the client cares about.
///
/// Every field is optional: issuers differ, and a missing `sub` or `email`
/// is not an error. `exp` is read as a float because some issuers emit
/// fractional seconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiry in seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<f64>,

    /// Subject (user id) the token was issued for.
    #[serde(default)]
    pub sub: Option<String>,

    /// Email claim, when the issuer includes it.
    #[serde(default)]
    pub email: Option<String>,

    /// Role claim, when the issuer includes it. Informational only.
    #[serde(default)]
    pub role: Option<String>,
}

impl Claims {
    /// Converts the `exp` claim to a wall-clock instant (millisecond
    /// precision).
    ///
    /// # Errors
    /// [`TokenError::MissingExpiry`] if `exp` is absent, not finite, or out
    /// of the representable range.
    pub fn expires_at(&self) -> Result<DateTime<Utc>, TokenError> {
        let exp = self.exp.ok_or(TokenError::MissingExpiry)?;
        if !exp.is_finite() {
            return Err(TokenError::MissingExpiry);
        }
        let millis = (exp * 1000.0).round() as i64;
        DateTime::from_timestamp_millis(millis).ok_or(TokenError::MissingExpiry)
    }
}

/// Decodes the payload segment of `token` into [`Claims`].
///
/// # Errors
/// - [`TokenError::Malformed`] if the token does not have three segments
/// - [`TokenError::Base64`] if the payload is not base64url
/// - [`TokenError::Claims`] if the payload is not a JSON object
pub fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Malformed(segments.len()));
    }

    let payload = PAYLOAD_ENGINE.decode(segments[1])?;
    let claims: Claims = serde_json::from_slice(&payload)?;
    Ok(claims)
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

/// Computes when `access_token` expires.
///
/// Never fails: if the token cannot be decoded, or carries no `exp`, the
/// result is `now + 15 minutes`.
pub fn compute_expiry(access_token: &str) -> DateTime<Utc> {
    compute_expiry_with(
        access_token,
        Utc::now(),
        TimeDelta::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
    )
}

/// [`compute_expiry`] with an explicit clock and fallback lifetime.
pub fn compute_expiry_with(
    access_token: &str,
    now: DateTime<Utc>,
    fallback: TimeDelta,
) -> DateTime<Utc> {
    match decode_claims(access_token).and_then(|claims| claims.expires_at()) {
        Ok(expires_at) => expires_at,
        Err(e) => {
            tracing::debug!(error = %e, "access token expiry undecodable, using fallback lifetime");
            // Millisecond precision, same as the stored form.
            (now + fallback).trunc_subsecs(3)
        }
    }
}

/// Returns `true` when `expires_at` is within one minute of now (or past).
pub fn is_near_expiry(expires_at: DateTime<Utc>) -> bool {
    is_near_expiry_at(
        expires_at,
        Utc::now(),
        TimeDelta::seconds(EXPIRY_BUFFER_SECS),
    )
}

/// [`is_near_expiry`] with an explicit clock and buffer.
pub fn is_near_expiry_at(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    buffer: TimeDelta,
) -> bool {
    expires_at <= now + buffer
}
