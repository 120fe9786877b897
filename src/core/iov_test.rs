use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::Condition;
use crate::CondIOVResource;
use crate::ConditionError;
use crate::Error;
use crate::EventTime;
use crate::InMemoryStore;
use crate::ManagerConfig;
use crate::ParamValue;
use crate::SystemError;
use crate::UpdateManager;
use crate::ValidityInterval;

const MAGNET: &str = "/dd/Conditions/Magnet";

fn iov(
    since: u64,
    until: u64,
) -> ValidityInterval {
    ValidityInterval::new(EventTime(since), EventTime(until)).unwrap()
}

/// Magnet current with two validity slices, [0,100) and [100,200).
fn manager() -> Arc<UpdateManager> {
    let store = InMemoryStore::new();
    store.insert(
        MAGNET,
        Condition::new(iov(0, 100)).with_param("Current", ParamValue::Double(5850.0)),
    );
    store.insert(
        MAGNET,
        Condition::new(iov(100, 200)).with_param("Current", ParamValue::Double(-5850.0)),
    );
    let manager =
        Arc::new(UpdateManager::new(Arc::new(store), ManagerConfig::default()).unwrap());
    let consumer = manager.register_consumer("MagnetUser", |_| Ok(()));
    manager.register_condition(consumer, MAGNET, None).unwrap();
    manager.start().unwrap();
    manager
}

#[test]
fn test_reserve_requires_start() {
    let store = Arc::new(InMemoryStore::new());
    let manager = UpdateManager::new(store, ManagerConfig::default()).unwrap();

    let e = manager.reserve(EventTime(10)).unwrap_err();
    assert!(matches!(e, Error::System(SystemError::NotStarted)));
}

#[test]
fn test_reserve_pins_a_view_covering_the_event_time() {
    let manager = manager();

    let lock = manager.reserve(EventTime(50)).unwrap();

    assert!(lock.interval().contains(EventTime(50)));
    assert_eq!(lock.interval(), iov(0, 100));
    let magnet = lock.condition(MAGNET).unwrap();
    assert_eq!(magnet.param::<f64>("Current").unwrap(), 5850.0);
}

#[test]
fn test_reserve_unknown_path_in_pinned_view() {
    let manager = manager();
    let lock = manager.reserve(EventTime(50)).unwrap();

    let e = lock.condition("/dd/Conditions/Missing").unwrap_err();
    assert!(matches!(
        e,
        Error::Condition(ConditionError::NotFound { .. })
    ));
}

#[test]
fn test_reserve_within_pinned_interval_does_not_recompute() {
    let manager = manager();
    manager.new_event(EventTime(50)).unwrap();
    let after_pass = manager.recomputations();

    let _lock = manager.reserve(EventTime(75)).unwrap();

    assert_eq!(manager.recomputations(), after_pass);
}

#[test]
fn test_shared_reservations_coexist() {
    let manager = manager();

    let first = manager.reserve(EventTime(50)).unwrap();
    let second = manager.reserve(EventTime(75)).unwrap();

    assert_eq!(first.interval(), second.interval());
    assert!(first.condition(MAGNET).is_ok());
    assert!(second.condition(MAGNET).is_ok());
}

/// The interval reported by a reservation must come from the pinned state,
/// not from the mutable snapshot: an invalidation thread resetting the
/// snapshot between the update pass and the claim must not make a valid
/// reservation report an empty window.
#[test]
fn test_reservation_interval_survives_concurrent_invalidation() {
    let manager = manager();

    let invalidator = {
        let manager = manager.clone();
        thread::spawn(move || {
            for _ in 0..1000 {
                manager.invalidate_path(MAGNET);
            }
        })
    };

    for _ in 0..200 {
        let lock = manager.reserve(EventTime(50)).unwrap();
        assert!(
            lock.interval().contains(EventTime(50)),
            "reservation reported interval {} not covering the event time",
            lock.interval()
        );
    }

    invalidator.join().unwrap();
}

/// An update pass forced by a reservation outside the pinned interval must
/// wait until every live shared claim is released.
#[test]
fn test_update_waits_for_live_reservations() {
    let manager = manager();
    manager.new_event(EventTime(50)).unwrap();

    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel();

    let holder = {
        let manager = manager.clone();
        thread::spawn(move || {
            let lock = manager.reserve(EventTime(50)).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            drop(lock);
        })
    };
    held_rx.recv().unwrap();

    let updater = {
        let manager = manager.clone();
        thread::spawn(move || {
            // time 150 is outside [0,100): this reservation needs a pass
            let lock = manager.reserve(EventTime(150)).unwrap();
            done_tx.send(lock.interval()).unwrap();
        })
    };

    // the exclusive pass must be blocked while the shared claim is alive
    assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

    release_tx.send(()).unwrap();
    let pinned = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("update must proceed once the shared claim is released");
    assert_eq!(pinned, iov(100, 200));

    holder.join().unwrap();
    updater.join().unwrap();
}
