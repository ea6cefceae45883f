//! The visible location of the running client.
//!
//! After an external sign-in the identity provider redirects back with the
//! token pair in the query string. The manager reads the tokens once at
//! bootstrap and immediately replaces the location with a copy that no
//! longer carries them, so they don't linger in history or get shared.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use url::Url;

/// Read/replace access to the client's current location.
pub trait Location: Send + Sync + 'static {
    /// The current location, if the context has one.
    fn current(&self) -> Option<Url>;

    /// Replaces the current location without navigating.
    fn replace(&self, url: Url);
}

/// A location held in memory. Used by tests and by hosts that feed the
/// launch URL in themselves.
#[derive(Default)]
pub struct MemoryLocation {
    url: Mutex<Option<Url>>,
}

impl MemoryLocation {
    pub fn new(url: Url) -> Self {
        Self {
            url: Mutex::new(Some(url)),
        }
    }

    /// A context with no location at all.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl Location for MemoryLocation {
    fn current(&self) -> Option<Url> {
        self.url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, url: Url) {
        *self.url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url);
    }
}

impl fmt::Debug for MemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryLocation").field(&self.current()).finish()
    }
}

/// The result of scanning a location for redirect tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UrlTokens {
    /// `(access, refresh)` when both parameters were present and non-empty.
    pub tokens: Option<(String, String)>,
    /// The location without either parameter, when at least one was there.
    pub stripped: Option<Url>,
}

/// Pulls the token parameters out of `url`.
pub(crate) fn take_url_tokens(
    url: &Url,
    access_param: &str,
    refresh_param: &str,
) -> UrlTokens {
    let mut access = None;
    let mut refresh = None;
    let mut kept = Vec::new();

    for (name, value) in url.query_pairs() {
        if name == access_param {
            access = Some(value.into_owned());
        } else if name == refresh_param {
            refresh = Some(value.into_owned());
        } else {
            kept.push((name.into_owned(), value.into_owned()));
        }
    }

    if access.is_none() && refresh.is_none() {
        return UrlTokens {
            tokens: None,
            stripped: None,
        };
    }

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(&kept);
    }

    let tokens = match (access, refresh) {
        (Some(a), Some(r)) if !a.is_empty() && !r.is_empty() => Some((a, r)),
        _ => None,
    };

    UrlTokens {
        tokens,
        stripped: Some(stripped),
    }
}
