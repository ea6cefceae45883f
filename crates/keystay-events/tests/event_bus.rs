//! Integration tests for lifecycle event delivery.

use std::sync::{Arc, Mutex};

use keystay_events::{EventBus, EventKind, LifecycleEvent, LogoutReason};

// =========================================================================
// Helpers
// =========================================================================

fn logout() -> LifecycleEvent {
    LifecycleEvent::Logout {
        reason: LogoutReason::UserRequested,
    }
}

/// Returns a shared log and a callback factory that appends `label` to it.
fn recorder() -> (
    Arc<Mutex<Vec<&'static str>>>,
    impl Fn(&'static str) -> Box<dyn Fn(&LifecycleEvent) + Send + Sync>,
) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory = {
        let log = Arc::clone(&log);
        move |label: &'static str| {
            let log = Arc::clone(&log);
            Box::new(move |_: &LifecycleEvent| log.lock().unwrap().push(label))
                as Box<dyn Fn(&LifecycleEvent) + Send + Sync>
        }
    };
    (log, factory)
}

// =========================================================================
// Ordering and filtering
// =========================================================================

#[test]
fn test_emit_calls_subscribers_in_subscription_order() {
    let bus = EventBus::new();
    let (log, record) = recorder();
    bus.on(EventKind::Logout, record("first"));
    bus.on(EventKind::Logout, record("second"));
    bus.on(EventKind::Logout, record("third"));

    let delivered = bus.emit(logout());

    assert_eq!(delivered, 3);
    assert_eq!(*log.lock().unwrap(), ["first", "second", "third"]);
}

#[test]
fn test_emit_only_reaches_subscribers_of_that_kind() {
    let bus = EventBus::new();
    let (log, record) = recorder();
    bus.on(EventKind::Login, record("login"));
    bus.on(EventKind::Logout, record("logout"));

    bus.emit(logout());

    assert_eq!(*log.lock().unwrap(), ["logout"]);
}

#[test]
fn test_off_stops_delivery() {
    let bus = EventBus::new();
    let (log, record) = recorder();
    let id = bus.on(EventKind::Logout, record("gone"));
    bus.on(EventKind::Logout, record("kept"));

    bus.off(EventKind::Logout, id);
    bus.emit(logout());

    assert_eq!(*log.lock().unwrap(), ["kept"]);
}

// =========================================================================
// Isolation
// =========================================================================

#[test]
fn test_panicking_subscriber_does_not_block_the_next_one() {
    let bus = EventBus::new();
    let (log, record) = recorder();
    bus.on(EventKind::Logout, |_| panic!("subscriber failure"));
    bus.on(EventKind::Logout, record("after"));

    let delivered = bus.emit(logout());

    assert_eq!(delivered, 1);
    assert_eq!(*log.lock().unwrap(), ["after"]);
}

#[test]
fn test_subscriber_may_unsubscribe_itself_during_emit() {
    let bus = Arc::new(EventBus::new());
    let slot = Arc::new(Mutex::new(None));
    let id = {
        let bus_ref = Arc::clone(&bus);
        let slot = Arc::clone(&slot);
        bus.on(EventKind::Logout, move |_| {
            if let Some(id) = slot.lock().unwrap().take() {
                bus_ref.off(EventKind::Logout, id);
            }
        })
    };
    *slot.lock().unwrap() = Some(id);

    bus.emit(logout());

    assert_eq!(bus.subscriber_count(EventKind::Logout), 0);
}

#[test]
fn test_late_subscriber_gets_no_replay() {
    let bus = EventBus::new();
    bus.emit(logout());
    let (log, record) = recorder();

    bus.on(EventKind::Logout, record("late"));

    assert!(log.lock().unwrap().is_empty());
}
