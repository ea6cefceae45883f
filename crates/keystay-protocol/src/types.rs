//! Identity and credential types shared by every Keystay layer.
//!
//! These are the values that travel between the client and the identity
//! endpoint (profiles, refresh requests) and the values that are written to
//! the persistent store (token pairs, session summaries).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::TokenError;
use crate::codec::{
    DEFAULT_TOKEN_LIFETIME_SECS, EXPIRY_BUFFER_SECS, compute_expiry_with,
    is_near_expiry_at,
};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The kind of account a user holds on the booking platform.
///
/// This is a closed set. The UI renders differently for each role, so a
/// profile that reports anything else cannot be rendered safely and is
/// rejected while decoding (see [`TokenError::UnknownRole`]).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Role {
    Guest,
    Host,
    Agent,
    Tourguide,
}

impl Role {
    /// The wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Host => "host",
            Self::Agent => "agent",
            Self::Tourguide => "tourguide",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "guest" => Ok(Self::Guest),
            "host" => Ok(Self::Host),
            "agent" => Ok(Self::Agent),
            "tourguide" => Ok(Self::Tourguide),
            _ => Err(TokenError::UnknownRole(s.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = TokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// The authenticated user's profile as returned by the identity endpoint.
///
/// The addressing fields the settings pages edit vary by country, so they
/// are kept as an open JSON object in `extra` rather than modelled here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Every other field the endpoint returned, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Profile {
    /// Shallow-merges `update` into this profile.
    ///
    /// Fields that are `None` in the update are left alone. Keys in
    /// `update.extra` replace the same keys in `self.extra` wholesale (no
    /// deep merge of nested objects).
    pub fn merge(&mut self, update: ProfileUpdate) {
        if let Some(email) = update.email {
            self.email = email;
        }
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(phone) = update.phone {
            self.phone = Some(phone);
        }
        if let Some(avatar_url) = update.avatar_url {
            self.avatar_url = Some(avatar_url);
        }
        if let Some(country) = update.country {
            self.country = Some(country);
        }
        self.extra.extend(update.extra);
    }
}

/// A partial profile edit.
///
/// `id` and `role` are not editable from the client and are absent here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// SessionSummary
// ---------------------------------------------------------------------------

/// A small, denormalized view of the signed-in user.
///
/// Persisted next to the token pair so a sidebar can render the user's name
/// and role instantly on reload, before any network call finishes. It is a
/// cache: authorization decisions never read it.
///
/// The only way to build one is from a [`Profile`], so it always reflects
/// the latest fetched or updated profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub role: Role,
    pub name: String,
    pub id: String,
    pub email: String,
}

impl From<&Profile> for SessionSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            role: profile.role,
            name: profile.name.clone(),
            id: profile.id.clone(),
            email: profile.email.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenPair
// ---------------------------------------------------------------------------

/// An access/refresh token bundle with the access token's expiry.
///
/// `expires_at` is computed from the access token's `exp` claim when the
/// pair is built. There is no constructor that accepts an expiry, so it can
/// never drift from the token it describes. On the wire (and in storage) it
/// is written as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// Builds a pair, decoding the expiry from `access_token`.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self::new_at(
            access_token,
            refresh_token,
            Utc::now(),
            TimeDelta::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
        )
    }

    /// [`new`](Self::new) with an explicit clock and fallback lifetime.
    pub fn new_at(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        now: DateTime<Utc>,
        fallback: TimeDelta,
    ) -> Self {
        let access_token = access_token.into();
        let expires_at = compute_expiry_with(&access_token, now, fallback);
        Self {
            access_token,
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Builds the pair that replaces `self` after a successful refresh.
    ///
    /// Identity endpoints may or may not rotate the refresh token. When the
    /// response carries none, the current one stays valid and is kept.
    pub fn rotate(&self, response: RefreshResponse, fallback: TimeDelta) -> Self {
        let refresh_token = response
            .refresh_token
            .unwrap_or_else(|| self.refresh_token.clone());
        Self::new_at(response.access_token, refresh_token, Utc::now(), fallback)
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns `true` when the access token expires within one minute.
    pub fn is_near_expiry(&self) -> bool {
        self.is_near_expiry_within(TimeDelta::seconds(EXPIRY_BUFFER_SECS))
    }

    /// Returns `true` when the access token expires within `buffer`.
    pub fn is_near_expiry_within(&self, buffer: TimeDelta) -> bool {
        is_near_expiry_at(self.expires_at, Utc::now(), buffer)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The in-memory record of the signed-in user.
///
/// Only the session manager creates or mutates these; everything else
/// receives clones.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: Profile,
    pub tokens: TokenPair,
    pub role: Role,
}

impl Session {
    /// Builds a session whose role is taken from the profile.
    pub fn new(user: Profile, tokens: TokenPair) -> Self {
        let role = user.role;
        Self { user, tokens, role }
    }

    /// The summary to persist for this session.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from(&self.user)
    }
}

// ---------------------------------------------------------------------------
// Refresh wire types
// ---------------------------------------------------------------------------

/// Body of the refresh call: `{"refreshToken": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response of the refresh call: `{"accessToken": "...", "refreshToken"?: "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    use super::*;

    fn jwt(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("h.{payload}.s")
    }

    fn profile() -> Profile {
        serde_json::from_value(json!({
            "id": "u-1",
            "email": "ana@example.com",
            "name": "Ana",
            "role": "host",
            "addressLine1": "1 Main St",
        }))
        .expect("valid profile")
    }

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("TourGuide".parse::<Role>().unwrap(), Role::Tourguide);
        assert_eq!("guest".parse::<Role>().unwrap(), Role::Guest);
    }

    #[test]
    fn test_role_unknown_value_is_rejected() {
        let result = "admin".parse::<Role>();

        assert!(matches!(result, Err(TokenError::UnknownRole(r)) if r == "admin"));
    }

    #[test]
    fn test_profile_deserialize_unknown_role_fails() {
        let result: Result<Profile, _> = serde_json::from_value(json!({
            "id": "u-1", "email": "a@b.c", "role": "superuser"
        }));

        let err = result.expect_err("unknown role must not decode");
        assert!(err.to_string().contains("superuser"));
    }

    #[test]
    fn test_profile_deserialize_keeps_unmodelled_fields_in_extra() {
        let profile = profile();

        assert_eq!(profile.role, Role::Host);
        assert_eq!(profile.extra["addressLine1"], "1 Main St");
    }

    #[test]
    fn test_profile_merge_overrides_only_provided_fields() {
        let mut profile = profile();
        let mut extra = serde_json::Map::new();
        extra.insert("addressLine1".into(), json!("2 Side St"));

        profile.merge(ProfileUpdate {
            name: Some("Ana B".into()),
            extra,
            ..ProfileUpdate::default()
        });

        assert_eq!(profile.name, "Ana B");
        assert_eq!(profile.email, "ana@example.com");
        assert_eq!(profile.extra["addressLine1"], "2 Side St");
    }

    #[test]
    fn test_summary_from_profile_copies_identity() {
        let summary = SessionSummary::from(&profile());

        assert_eq!(summary.id, "u-1");
        assert_eq!(summary.name, "Ana");
        assert_eq!(summary.role, Role::Host);
    }

    #[test]
    fn test_token_pair_expiry_comes_from_access_token() {
        let pair = TokenPair::new(jwt(1_700_000_000), "refresh");

        assert_eq!(pair.expires_at().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_token_pair_serializes_expiry_as_millis() {
        let pair = TokenPair::new(jwt(1_700_000_000), "refresh");

        let value = serde_json::to_value(&pair).unwrap();

        assert_eq!(value["expiresAt"], json!(1_700_000_000_000_i64));
        assert_eq!(value["refreshToken"], "refresh");
    }

    #[test]
    fn test_token_pair_rotate_keeps_refresh_token_when_absent() {
        let pair = TokenPair::new(jwt(1), "old-refresh");

        let rotated = pair.rotate(
            RefreshResponse {
                access_token: jwt(2),
                refresh_token: None,
            },
            TimeDelta::minutes(15),
        );

        assert_eq!(rotated.refresh_token(), "old-refresh");
        assert_eq!(rotated.expires_at().timestamp(), 2);
    }

    #[test]
    fn test_token_pair_rotate_takes_new_refresh_token() {
        let pair = TokenPair::new(jwt(1), "old-refresh");

        let rotated = pair.rotate(
            RefreshResponse {
                access_token: jwt(2),
                refresh_token: Some("new-refresh".into()),
            },
            TimeDelta::minutes(15),
        );

        assert_eq!(rotated.refresh_token(), "new-refresh");
    }

    #[test]
    fn test_refresh_response_refresh_token_is_optional() {
        let response: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"a"}"#).unwrap();

        assert_eq!(response.refresh_token, None);
    }
}
