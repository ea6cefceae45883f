//! Integration tests for starting session contexts side by side.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use keystay::prelude::*;
use keystay::protocol::RefreshResponse;
use keystay::store::CredentialStore;

// =========================================================================
// Helpers
// =========================================================================

fn jwt(secs: i64) -> String {
    let exp = Utc::now().timestamp() + secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig")
}

/// Accepts every token; counts sign-outs.
#[derive(Default)]
struct AcceptAll {
    logouts: AtomicUsize,
}

impl AuthClient for AcceptAll {
    async fn fetch_profile(&self, _: &str) -> Result<Profile, AuthError> {
        Ok(serde_json::from_value(serde_json::json!({
            "id": "u-3",
            "email": "li@stay.example",
            "name": "Li",
            "role": "tourguide"
        }))
        .unwrap())
    }

    async fn refresh(&self, _: &str) -> Result<RefreshResponse, AuthError> {
        Ok(RefreshResponse {
            access_token: jwt(3600),
            refresh_token: None,
        })
    }

    async fn logout(&self, _: &str) -> Result<(), AuthError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn signed_in_store() -> MemoryStore {
    let kv = MemoryStore::new();
    CredentialStore::new(kv.clone())
        .save(&TokenPair::new(jwt(3600), "refresh-1"))
        .unwrap();
    kv
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_start_bootstraps_and_runs_background_tasks() {
    let context = SessionContextBuilder::new()
        .start(AcceptAll::default(), signed_in_store())
        .await;

    let session = context.session().unwrap();
    assert_eq!(session.role, Role::Tourguide);
    assert!(context.listening());
    assert!(context.auto_refresh_running());
}

#[tokio::test]
async fn test_start_with_auto_refresh_disabled() {
    let context = SessionContextBuilder::new()
        .config_json(r#"{"autoRefresh": false}"#)
        .unwrap()
        .start(AcceptAll::default(), MemoryStore::new())
        .await;

    assert!(context.session().is_none());
    assert!(!context.auto_refresh_running());
}

#[test]
fn test_config_json_rejects_invalid_input() {
    let result = SessionContextBuilder::new().config_json("not json");

    assert!(matches!(result, Err(KeystayError::Config(_))));
}

#[test]
fn test_config_json_rejects_out_of_range_duration() {
    let result =
        SessionContextBuilder::new().config_json(r#"{"expiryBufferSecs": 9223372036854775807}"#);

    assert!(matches!(result, Err(KeystayError::Config(_))));
}

#[tokio::test]
async fn test_shutdown_stops_background_tasks() {
    let context = SessionContextBuilder::new()
        .start(AcceptAll::default(), signed_in_store())
        .await;

    context.shutdown();
    for _ in 0..200 {
        if !context.listening() && !context.auto_refresh_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(!context.listening());
    assert!(!context.auto_refresh_running());
    assert!(context.manager().is_authenticated());
}

#[tokio::test]
async fn test_sibling_contexts_converge_on_logout() {
    let kv = signed_in_store();
    let auth_b = Arc::new(AcceptAll::default());
    let a = SessionContextBuilder::new()
        .start(AcceptAll::default(), kv.clone())
        .await;
    let b = SessionContextBuilder::new()
        .start(Arc::clone(&auth_b), kv.open_context())
        .await;
    assert!(b.manager().is_authenticated());

    a.manager().logout().await;
    for _ in 0..200 {
        if !b.manager().is_authenticated() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(b.manager().status(), SessionStatus::Unauthenticated);
    assert_eq!(auth_b.logouts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shared_event_bus_sees_login() {
    let bus = Arc::new(EventBus::new());
    let logins = Arc::new(AtomicUsize::new(0));
    {
        let logins = Arc::clone(&logins);
        bus.on(EventKind::Login, move |_| {
            logins.fetch_add(1, Ordering::SeqCst);
        });
    }

    let context = SessionContextBuilder::new()
        .events(Arc::clone(&bus))
        .start(AcceptAll::default(), signed_in_store())
        .await;

    assert!(Arc::ptr_eq(context.events(), &bus));
    assert_eq!(logins.load(Ordering::SeqCst), 1);
}
