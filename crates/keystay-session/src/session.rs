//! Session configuration and the manager's coarse status.

use chrono::TimeDelta;
use keystay_protocol::{DEFAULT_TOKEN_LIFETIME_SECS, EXPIRY_BUFFER_SECS};
use serde::{Deserialize, Serialize};

/// Upper bound for every duration setting: ten years.
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
///
/// Every field has a default, so a config file only needs the values it
/// changes:
///
/// ```rust
/// use keystay_session::SessionConfig;
///
/// let config = SessionConfig::from_json(r#"{
///     "endpoints": { "baseUrl": "https://api.example.com" }
/// }"#).unwrap();
///
/// assert_eq!(config.expiry_buffer_secs, 60);
/// assert_eq!(config.endpoints.base_url, "https://api.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// How early (in seconds) before expiry an access token counts as
    /// "near expiry" and gets refreshed.
    ///
    /// Default: 60 seconds.
    pub expiry_buffer_secs: i64,

    /// Lifetime assumed for an access token whose expiry cannot be
    /// decoded.
    ///
    /// Default: 15 minutes.
    pub fallback_lifetime_secs: i64,

    /// Query parameter that carries the access token on a post-login
    /// redirect.
    pub access_token_param: String,

    /// Query parameter that carries the refresh token on a post-login
    /// redirect.
    pub refresh_token_param: String,

    /// Whether the context refreshes tokens ahead of expiry on its own.
    ///
    /// Default: `true`.
    pub auto_refresh: bool,

    /// Where the identity endpoint lives.
    pub endpoints: AuthEndpoints,
}

impl SessionConfig {
    /// Parses a config from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Fails on malformed JSON, and when a duration setting is negative or
    /// above [`MAX_DURATION_SECS`].
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        use serde::de::Error as _;

        let config: Self = serde_json::from_str(raw)?;
        for (name, secs) in [
            ("expiryBufferSecs", config.expiry_buffer_secs),
            ("fallbackLifetimeSecs", config.fallback_lifetime_secs),
        ] {
            if !(0..=MAX_DURATION_SECS).contains(&secs) {
                return Err(serde_json::Error::custom(format!(
                    "{name} must be between 0 and {MAX_DURATION_SECS}, got {secs}"
                )));
            }
        }
        Ok(config)
    }

    /// The near-expiry window, clamped to `0..=MAX_DURATION_SECS`.
    pub fn expiry_buffer(&self) -> TimeDelta {
        clamped_seconds(self.expiry_buffer_secs)
    }

    /// The assumed token lifetime, clamped to `0..=MAX_DURATION_SECS`.
    pub fn fallback_lifetime(&self) -> TimeDelta {
        clamped_seconds(self.fallback_lifetime_secs)
    }
}

fn clamped_seconds(secs: i64) -> TimeDelta {
    TimeDelta::try_seconds(secs.clamp(0, MAX_DURATION_SECS)).unwrap_or(TimeDelta::zero())
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_secs: EXPIRY_BUFFER_SECS,
            fallback_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            access_token_param: "access_token".into(),
            refresh_token_param: "refresh_token".into(),
            auto_refresh: true,
            endpoints: AuthEndpoints::default(),
        }
    }
}

/// Base URL, paths, and timeout of the identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthEndpoints {
    pub base_url: String,
    /// `GET`, bearer-authenticated. Returns the profile.
    pub profile_path: String,
    /// `POST {"refreshToken"}`. Returns a new access token.
    pub refresh_path: String,
    /// `POST`, bearer-authenticated.
    pub logout_path: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".into(),
            profile_path: "/users/me".into(),
            refresh_path: "/auth/refresh".into(),
            logout_path: "/auth/logout".into(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Where the manager is in its lifecycle.
///
/// ```text
///   Unbootstrapped ──(initialize)──→ Authenticated ⇄ (refresh)
///         │                             │
///         └──────────────→ Unauthenticated ←──(logout / expiry)
///                                 │
///                                 └──(login)──→ Authenticated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// `initialize` has not finished yet.
    Unbootstrapped,
    /// A user is signed in.
    Authenticated,
    /// Nobody is signed in.
    Unauthenticated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_documented_values() {
        let config = SessionConfig::default();

        assert_eq!(config.expiry_buffer(), TimeDelta::seconds(60));
        assert_eq!(config.fallback_lifetime(), TimeDelta::minutes(15));
        assert_eq!(config.access_token_param, "access_token");
        assert_eq!(config.refresh_token_param, "refresh_token");
        assert!(config.auto_refresh);
    }

    #[test]
    fn test_from_json_fills_missing_fields_with_defaults() {
        let config = SessionConfig::from_json(
            r#"{"autoRefresh": false, "endpoints": {"timeoutSecs": 5}}"#,
        )
        .unwrap();

        assert!(!config.auto_refresh);
        assert_eq!(config.endpoints.timeout_secs, 5);
        assert_eq!(config.endpoints.refresh_path, "/auth/refresh");
        assert_eq!(config.expiry_buffer_secs, 60);
    }

    #[test]
    fn test_from_json_rejects_out_of_range_durations() {
        let too_long = SessionConfig::from_json(r#"{"expiryBufferSecs": 9223372036854775807}"#);
        let negative = SessionConfig::from_json(r#"{"fallbackLifetimeSecs": -1}"#);

        assert!(too_long.unwrap_err().to_string().contains("expiryBufferSecs"));
        assert!(negative.is_err());
    }

    #[test]
    fn test_durations_are_clamped_when_set_directly() {
        let config = SessionConfig {
            expiry_buffer_secs: i64::MAX,
            fallback_lifetime_secs: i64::MIN,
            ..SessionConfig::default()
        };

        assert_eq!(config.expiry_buffer(), TimeDelta::seconds(MAX_DURATION_SECS));
        assert_eq!(config.fallback_lifetime(), TimeDelta::zero());
    }

    #[test]
    fn test_from_json_rejects_wrong_types() {
        assert!(SessionConfig::from_json(r#"{"autoRefresh": "yes"}"#).is_err());
    }
}
