//! A terminal stand-in for the booking front end's shell.
//!
//! Renders the sidebar from the cached summary before the network answers,
//! bootstraps the session, and then redraws on every lifecycle event until
//! Ctrl-C. Run two copies against the same store file to watch them follow
//! each other's sign-outs and refreshes.
//!
//! ```text
//! KEYSTAY_API=https://api.stay.example/api \
//! KEYSTAY_STORE=/tmp/session.json \
//!     cargo run -p booking-shell -- "https://stay.example/?access_token=..&refresh_token=.."
//! ```

use std::sync::Arc;
use std::time::Duration;

use keystay::prelude::*;
use keystay::store::CredentialStore;
use url::Url;

/// How often the store file is checked for writes by other processes.
const STORE_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// One line of sidebar text for the given (possibly cached) user.
fn sidebar(summary: Option<&SessionSummary>) -> String {
    match summary {
        Some(user) => format!("[{}] {} <{}>", user.role, user.name, user.email),
        None => "[signed out] sign in to manage your stays".to_string(),
    }
}

fn describe(event: &LifecycleEvent) -> String {
    match event {
        LifecycleEvent::Login { session } => {
            format!("signed in: {}", sidebar(Some(&session.summary())))
        }
        LifecycleEvent::Logout { reason } => format!("signed out ({reason:?})"),
        LifecycleEvent::TokenRefreshed { tokens } => {
            format!("token refreshed, valid until {}", tokens.expires_at())
        }
        LifecycleEvent::SessionExpired { reason } => format!("session expired: {reason}"),
        LifecycleEvent::ProfileUpdated { user } => {
            format!("profile updated: {}", sidebar(Some(&SessionSummary::from(user))))
        }
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

fn config_from_env() -> SessionConfig {
    let mut config = SessionConfig::default();
    if let Ok(base_url) = std::env::var("KEYSTAY_API") {
        config.endpoints.base_url = base_url;
    }
    config
}

fn launch_location(arg: Option<String>) -> Result<MemoryLocation, url::ParseError> {
    match arg {
        Some(raw) => Ok(MemoryLocation::new(Url::parse(&raw)?)),
        None => Ok(MemoryLocation::empty()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store_path =
        std::env::var("KEYSTAY_STORE").unwrap_or_else(|_| "booking-session.json".to_string());
    let store = Arc::new(FileStore::open(&store_path));
    let _watcher = store.watch(STORE_POLL_INTERVAL);

    let location = Arc::new(launch_location(std::env::args().nth(1))?);

    let events = Arc::new(EventBus::new());
    for kind in EventKind::ALL {
        events.on(kind, |event| println!("{}", describe(event)));
    }

    // Cached view first, so the shell never flashes "signed out" on reload.
    let cached = CredentialStore::new(Arc::clone(&store)).load_summary();
    println!("{}", sidebar(cached.as_ref()));

    let context = SessionContextBuilder::new()
        .config(config_from_env())
        .location(Arc::clone(&location) as Arc<dyn Location>)
        .events(events)
        .start_http(store)
        .await?;

    if let Some(url) = location.current() {
        tracing::debug!(%url, "visible location after bootstrap");
    }
    let current = context.session().map(|session| session.summary());
    println!("{}", sidebar(current.as_ref()));

    tokio::signal::ctrl_c().await?;
    context.shutdown();
    Ok(())
}
