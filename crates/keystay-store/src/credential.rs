//! Credential persistence on top of a [`KeyValueStore`].
//!
//! This is the only code that knows which keys hold credentials. Layout:
//!
//! | key               | value                                   |
//! |-------------------|-----------------------------------------|
//! | `keystay.tokens`  | canonical [`TokenPair`] as JSON         |
//! | `access_token`    | legacy: bare access token               |
//! | `refresh_token`   | legacy: bare refresh token              |
//! | `keystay.session` | [`SessionSummary`] as JSON              |
//!
//! Older clients only wrote the two legacy keys. We keep writing them and
//! fall back to them on read, so upgrading never strands a signed-in user.

use chrono::{TimeDelta, Utc};
use keystay_protocol::{DEFAULT_TOKEN_LIFETIME_SECS, SessionSummary, TokenPair};

use crate::{KeyValueStore, StoreError};

/// Canonical token pair record.
pub const TOKENS_KEY: &str = "keystay.tokens";
/// Session summary record.
pub const SUMMARY_KEY: &str = "keystay.session";
/// Legacy single-value access token.
pub const LEGACY_ACCESS_KEY: &str = "access_token";
/// Legacy single-value refresh token.
pub const LEGACY_REFRESH_KEY: &str = "refresh_token";

const ALL_KEYS: [&str; 4] =
    [TOKENS_KEY, LEGACY_ACCESS_KEY, LEGACY_REFRESH_KEY, SUMMARY_KEY];

/// Reads and writes the token pair and session summary.
pub struct CredentialStore<K: KeyValueStore> {
    kv: K,
    fallback_lifetime: TimeDelta,
}

impl<K: KeyValueStore> CredentialStore<K> {
    /// Wraps `kv` with the default 15-minute fallback lifetime.
    pub fn new(kv: K) -> Self {
        Self::with_fallback_lifetime(
            kv,
            TimeDelta::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
        )
    }

    /// Wraps `kv`; legacy tokens whose expiry cannot be decoded are given
    /// `fallback_lifetime`.
    pub fn with_fallback_lifetime(kv: K, fallback_lifetime: TimeDelta) -> Self {
        Self {
            kv,
            fallback_lifetime,
        }
    }

    /// The underlying store.
    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// Persists `tokens` under the canonical key and both legacy keys.
    ///
    /// # Errors
    /// Returns the first storage error. Keys written before the failure
    /// stay written.
    pub fn save(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        let record = serde_json::to_string(tokens)?;
        self.kv.set(TOKENS_KEY, &record)?;
        self.kv.set(LEGACY_ACCESS_KEY, tokens.access_token())?;
        self.kv.set(LEGACY_REFRESH_KEY, tokens.refresh_token())?;
        Ok(())
    }

    /// Loads the stored token pair.
    ///
    /// Prefers the canonical record; falls back to the legacy keys,
    /// recomputing the expiry from the access token. Storage failures are
    /// logged and reported as "nothing stored".
    pub fn load(&self) -> Option<TokenPair> {
        match self.kv.get(TOKENS_KEY) {
            Ok(Some(raw)) => {
                if let Some(tokens) = Self::decode_tokens(&raw) {
                    return Some(tokens);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stored tokens");
                return None;
            }
        }
        self.load_legacy()
    }

    /// Parses a canonical token record, as found in storage or in a
    /// [`StorageEvent`](crate::StorageEvent).
    pub fn decode_tokens(raw: &str) -> Option<TokenPair> {
        match serde_json::from_str(raw) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                tracing::warn!(error = %e, "stored token record is corrupt");
                None
            }
        }
    }

    fn load_legacy(&self) -> Option<TokenPair> {
        let read = |key: &str| match self.kv.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read legacy token");
                None
            }
        };
        let access = read(LEGACY_ACCESS_KEY)?;
        let refresh = read(LEGACY_REFRESH_KEY)?;
        tracing::debug!("restoring tokens from legacy keys");
        Some(TokenPair::new_at(
            access,
            refresh,
            Utc::now(),
            self.fallback_lifetime,
        ))
    }

    /// Persists the session summary.
    pub fn save_summary(&self, summary: &SessionSummary) -> Result<(), StoreError> {
        let record = serde_json::to_string(summary)?;
        self.kv.set(SUMMARY_KEY, &record)
    }

    /// Loads the session summary, if one is stored and readable.
    pub fn load_summary(&self) -> Option<SessionSummary> {
        let raw = match self.kv.get(SUMMARY_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read session summary");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|e| tracing::warn!(error = %e, "stored session summary is corrupt"))
            .ok()
    }

    /// Removes every credential key in one store operation.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.kv.remove_many(&ALL_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use keystay_protocol::Role;

    use super::*;
    use crate::MemoryStore;

    fn store() -> CredentialStore<MemoryStore> {
        CredentialStore::new(MemoryStore::new())
    }

    fn summary() -> SessionSummary {
        SessionSummary {
            role: Role::Agent,
            name: "Ana".into(),
            id: "u-1".into(),
            email: "ana@example.com".into(),
        }
    }

    #[test]
    fn test_load_empty_store_returns_none() {
        assert!(store().load().is_none());
    }

    #[test]
    fn test_save_writes_canonical_and_legacy_keys() {
        let store = store();
        let tokens = TokenPair::new("access", "refresh");

        store.save(&tokens).unwrap();

        assert!(store.kv().get(TOKENS_KEY).unwrap().is_some());
        assert_eq!(store.kv().get(LEGACY_ACCESS_KEY).unwrap().as_deref(), Some("access"));
        assert_eq!(store.kv().get(LEGACY_REFRESH_KEY).unwrap().as_deref(), Some("refresh"));
    }

    #[test]
    fn test_load_corrupt_canonical_falls_back_to_legacy() {
        let store = store();
        store.save(&TokenPair::new("access", "refresh")).unwrap();
        store.kv().set(TOKENS_KEY, "{broken").unwrap();

        let loaded = store.load().expect("legacy keys still present");

        assert_eq!(loaded.access_token(), "access");
    }

    #[test]
    fn test_load_with_only_one_legacy_key_returns_none() {
        let store = store();
        store.kv().set(LEGACY_ACCESS_KEY, "access").unwrap();

        assert!(store.load().is_none());
    }

    #[test]
    fn test_summary_round_trip() {
        let store = store();

        store.save_summary(&summary()).unwrap();

        assert_eq!(store.load_summary(), Some(summary()));
    }

    #[test]
    fn test_clear_removes_everything() {
        let store = store();
        store.save(&TokenPair::new("access", "refresh")).unwrap();
        store.save_summary(&summary()).unwrap();

        store.clear().unwrap();

        assert!(store.load().is_none());
        assert!(store.load_summary().is_none());
        assert!(store.kv().is_empty());
    }
}
