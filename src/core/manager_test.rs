use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::Condition;
use crate::ConditionDerivation;
use crate::ConditionError;
use crate::ConditionSlot;
use crate::Error;
use crate::EventTime;
use crate::InMemoryStore;
use crate::Incident;
use crate::IncidentHandler;
use crate::ManagerConfig;
use crate::MockConditionStore;
use crate::ParamValue;
use crate::Result;
use crate::SystemError;
use crate::UpdateContext;
use crate::UpdateManager;
use crate::ValidityInterval;

const ALIGNMENT: &str = "/dd/Conditions/Alignment";
const PEDESTAL: &str = "/dd/Conditions/Pedestal";
const CALIBRATION: &str = "/dd/Conditions/Calibration";

fn iov(
    since: u64,
    until: u64,
) -> ValidityInterval {
    ValidityInterval::new(EventTime(since), EventTime(until)).unwrap()
}

/// Alignment with two validity slices: shift 0.1 in [0,100), 0.2 in [100,200).
fn alignment_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.insert(
        ALIGNMENT,
        Condition::new(iov(0, 100)).with_param("Shift", ParamValue::Double(0.1)),
    );
    store.insert(
        ALIGNMENT,
        Condition::new(iov(100, 200)).with_param("Shift", ParamValue::Double(0.2)),
    );
    Arc::new(store)
}

fn started_manager(store: Arc<InMemoryStore>) -> UpdateManager {
    let manager = UpdateManager::new(store, ManagerConfig::default()).unwrap();
    manager.start().unwrap();
    manager
}

/// Registers a counting consumer on ALIGNMENT; returns the slot and the
/// invocation counter.
fn register_counting_consumer(
    manager: &UpdateManager,
) -> (crate::ConsumerId, ConditionSlot, Arc<AtomicUsize>) {
    let slot: ConditionSlot = Arc::new(ArcSwapOption::empty());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let consumer = manager.register_consumer("AlignmentUser", move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    manager
        .register_condition(consumer, ALIGNMENT, Some(slot.clone()))
        .unwrap();
    (consumer, slot, calls)
}

#[test]
fn test_new_event_requires_start() {
    let manager = UpdateManager::new(alignment_store(), ManagerConfig::default()).unwrap();

    let e = manager.new_event(EventTime(50)).unwrap_err();
    assert!(matches!(e, Error::System(SystemError::NotStarted)));
}

#[test]
fn test_start_fails_when_provider_unavailable() {
    let mut store = MockConditionStore::new();
    store.expect_ready().return_const(false);
    let manager = UpdateManager::new(Arc::new(store), ManagerConfig::default()).unwrap();

    assert!(matches!(manager.start().unwrap_err(), Error::Fatal(_)));
}

#[test]
fn test_register_condition_unknown_path() {
    let manager = started_manager(alignment_store());
    let consumer = manager.register_consumer("User", |_| Ok(()));

    let e = manager
        .register_condition(consumer, "/dd/Conditions/Missing", None)
        .unwrap_err();
    assert!(matches!(
        e,
        Error::Condition(ConditionError::NotFound { .. })
    ));
}

#[test]
fn test_register_condition_unknown_consumer() {
    let manager = started_manager(alignment_store());
    let consumer = manager.register_consumer("User", |_| Ok(()));
    manager.unregister(consumer);

    let e = manager
        .register_condition(consumer, ALIGNMENT, None)
        .unwrap_err();
    assert!(matches!(
        e,
        Error::Condition(ConditionError::UnknownConsumer(_))
    ));
}

#[test]
fn test_new_event_loads_everything_for_the_event_time() {
    let manager = started_manager(alignment_store());
    let (_, slot, calls) = register_counting_consumer(&manager);

    manager.new_event(EventTime(50)).unwrap();

    let loaded = slot.load_full().expect("slot must be filled");
    assert_eq!(loaded.param::<f64>("Shift").unwrap(), 0.1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.head_interval(), iov(0, 100));
}

#[test]
fn test_second_new_event_with_same_time_is_free() {
    let manager = started_manager(alignment_store());
    register_counting_consumer(&manager);

    manager.new_event(EventTime(50)).unwrap();
    let after_first = manager.recomputations();

    manager.new_event(EventTime(50)).unwrap();
    assert_eq!(manager.recomputations(), after_first);
}

#[test]
fn test_time_advance_within_interval_is_free() {
    let manager = started_manager(alignment_store());
    register_counting_consumer(&manager);

    manager.new_event(EventTime(50)).unwrap();
    let after_first = manager.recomputations();

    manager.new_event(EventTime(99)).unwrap();
    assert_eq!(manager.recomputations(), after_first);
}

#[test]
fn test_crossing_iov_boundary_reloads() {
    let manager = started_manager(alignment_store());
    let (_, slot, calls) = register_counting_consumer(&manager);

    manager.new_event(EventTime(50)).unwrap();
    manager.new_event(EventTime(150)).unwrap();

    let loaded = slot.load_full().unwrap();
    assert_eq!(loaded.param::<f64>("Shift").unwrap(), 0.2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.head_interval(), iov(100, 200));
}

#[test]
fn test_reload_with_identical_payload_skips_consumers() {
    let manager = started_manager(alignment_store());
    let (_, _, calls) = register_counting_consumer(&manager);
    manager.new_event(EventTime(50)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // out-of-band invalidation; the store still serves the same payload
    manager.invalidate_path(ALIGNMENT);
    manager.new_event(EventTime(50)).unwrap();

    // the source was reloaded but the value did not change
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_invalidate_consumer_forces_recompute() {
    let manager = started_manager(alignment_store());
    let (consumer, _, calls) = register_counting_consumer(&manager);
    manager.new_event(EventTime(50)).unwrap();

    manager.invalidate(consumer);
    manager.new_event(EventTime(50)).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_force_update_is_synchronous() {
    let manager = started_manager(alignment_store());
    let (consumer, _, calls) = register_counting_consumer(&manager);
    manager.new_event(EventTime(50)).unwrap();

    manager.force_update(consumer).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_new_event_from_store_uses_the_provider_time() {
    let store = alignment_store();
    store.set_event_time(EventTime(150));
    let manager = started_manager(store);
    let (_, slot, _) = register_counting_consumer(&manager);

    manager.new_event_from_store().unwrap();

    assert_eq!(slot.load_full().unwrap().param::<f64>("Shift").unwrap(), 0.2);
}

#[test]
fn test_new_event_from_store_without_provider_time() {
    let manager = started_manager(alignment_store());

    let e = manager.new_event_from_store().unwrap_err();
    assert!(matches!(e, Error::System(SystemError::NoEventTime)));
}

#[test]
fn test_force_update_without_event_time() {
    let manager = started_manager(alignment_store());
    let (consumer, _, _) = register_counting_consumer(&manager);

    let e = manager.force_update(consumer).unwrap_err();
    assert!(matches!(e, Error::System(SystemError::NoEventTime)));
}

#[test]
fn test_unregister_removes_the_revalidation_trigger() {
    let manager = started_manager(alignment_store());
    let (consumer, _, calls) = register_counting_consumer(&manager);
    manager.new_event(EventTime(50)).unwrap();

    manager.unregister(consumer);
    manager.new_event(EventTime(150)).unwrap();

    // the source is still tracked and reloaded, the consumer is gone
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let cond = manager.condition(ALIGNMENT).unwrap();
    assert_eq!(cond.param::<f64>("Shift").unwrap(), 0.2);
}

#[test]
fn test_purge_drops_conditions_without_backing_object() {
    let store = alignment_store();
    let manager = started_manager(store.clone());
    register_counting_consumer(&manager);
    manager.new_event(EventTime(50)).unwrap();

    store.remove(ALIGNMENT);
    manager.purge();
    // tolerant of a second purge with nothing left to drop
    manager.purge();

    let e = manager.condition(ALIGNMENT).unwrap_err();
    assert!(matches!(
        e,
        Error::Condition(ConditionError::NotFound { .. })
    ));
    // the published head interval is reset so the next event runs a pass
    assert!(manager.head_interval().is_empty());
}

#[test]
fn test_store_failure_aborts_the_pass() {
    let mut store = MockConditionStore::new();
    store.expect_ready().return_const(true);
    store.expect_exists().return_const(true);
    store.expect_event_time().return_const(None);
    store.expect_load().returning(|path, _| {
        Err(ConditionError::NotFound {
            path: path.to_string(),
        }
        .into())
    });

    let manager = UpdateManager::new(Arc::new(store), ManagerConfig::default()).unwrap();
    manager.start().unwrap();
    let consumer = manager.register_consumer("User", |_| Ok(()));
    manager.register_condition(consumer, ALIGNMENT, None).unwrap();

    assert!(manager.new_event(EventTime(50)).is_err());
}

#[test]
fn test_failing_consumer_aborts_the_pass() {
    let manager = started_manager(alignment_store());
    let consumer = manager.register_consumer("Broken", |_| {
        Err(Error::Fatal("misaligned detector".into()))
    });
    manager.register_condition(consumer, ALIGNMENT, None).unwrap();

    assert!(matches!(
        manager.new_event(EventTime(50)).unwrap_err(),
        Error::Fatal(_)
    ));
}

#[test]
fn test_head_interval_is_the_intersection_of_item_validities() {
    let store = InMemoryStore::new();
    store.insert(ALIGNMENT, Condition::new(iov(0, 100)));
    store.insert(PEDESTAL, Condition::new(iov(50, 150)));
    let manager = started_manager(Arc::new(store));
    let consumer = manager.register_consumer("User", |_| Ok(()));
    manager.register_condition(consumer, ALIGNMENT, None).unwrap();
    manager.register_condition(consumer, PEDESTAL, None).unwrap();

    manager.new_event(EventTime(60)).unwrap();

    let head = manager.head_interval();
    assert!(head.since <= head.until);
    assert_eq!(head, iov(50, 100));
}

// ---
// Derivations

struct GainDerivation;

impl ConditionDerivation for GainDerivation {
    fn inputs(&self) -> Vec<String> {
        vec![ALIGNMENT.to_string(), PEDESTAL.to_string()]
    }

    fn output(&self) -> String {
        CALIBRATION.to_string()
    }

    fn derive(
        &self,
        ctx: &UpdateContext<'_>,
    ) -> Result<Condition> {
        let shift = ctx.condition(ALIGNMENT)?.param::<f64>("Shift")?;
        let pedestal = ctx.condition(PEDESTAL)?.param::<f64>("Level")?;
        Ok(Condition::new(ValidityInterval::FOREVER)
            .with_param("Gain", ParamValue::Double(shift + pedestal)))
    }
}

fn derivation_store() -> Arc<InMemoryStore> {
    let store = alignment_store();
    store.insert(
        PEDESTAL,
        Condition::new(iov(50, 150)).with_param("Level", ParamValue::Double(1.0)),
    );
    store
}

#[test]
fn test_push_pop_roundtrip() {
    let manager = started_manager(derivation_store());
    let derivation: Box<dyn ConditionDerivation> = Box::new(GainDerivation);
    let raw = &*derivation as *const dyn ConditionDerivation as *const u8;

    let id = manager.push(derivation).unwrap();
    assert!(manager.has_derivation(id));

    let popped = manager.pop(id).unwrap();
    let popped_raw = &*popped as *const dyn ConditionDerivation as *const u8;
    assert_eq!(raw, popped_raw, "pop must return the pushed object");
    assert!(!manager.has_derivation(id));

    let e = manager.pop(id).unwrap_err();
    assert!(matches!(
        e,
        Error::Condition(ConditionError::UnknownDerivation(_))
    ));
}

#[test]
fn test_derivation_ids_are_monotonic() {
    let manager = started_manager(derivation_store());
    let first = manager.push(Box::new(GainDerivation)).unwrap();
    manager.pop(first).unwrap();
    let second = manager.push(Box::new(GainDerivation)).unwrap();

    assert!(second > first);
}

#[test]
fn test_derivation_runs_after_its_inputs() {
    let manager = started_manager(derivation_store());
    manager.push(Box::new(GainDerivation)).unwrap();

    manager.new_event(EventTime(60)).unwrap();

    let derived = manager.condition(CALIBRATION).unwrap();
    assert_eq!(derived.param::<f64>("Gain").unwrap(), 1.1);
    // validity clipped to the intersection of the inputs
    assert_eq!(derived.validity(), iov(50, 100));
}

#[test]
fn test_consumer_may_depend_on_a_derived_condition() {
    let manager = started_manager(derivation_store());
    manager.push(Box::new(GainDerivation)).unwrap();
    let slot: ConditionSlot = Arc::new(ArcSwapOption::empty());
    let consumer = manager.register_consumer("CalibrationUser", |_| Ok(()));
    manager
        .register_condition(consumer, CALIBRATION, Some(slot.clone()))
        .unwrap();

    manager.new_event(EventTime(60)).unwrap();

    assert_eq!(
        slot.load_full().unwrap().param::<f64>("Gain").unwrap(),
        1.1
    );
}

/// A derivation may declare a validity strictly narrower than its inputs'.
/// Once that window expires the next event must recompute the derived
/// condition even though every source is still valid, so the fast accept
/// path has to be bounded by the derived interval too.
#[test]
fn test_derived_validity_narrower_than_inputs_gates_the_fast_path() {
    struct WindowedDerivation;
    impl ConditionDerivation for WindowedDerivation {
        fn inputs(&self) -> Vec<String> {
            vec![ALIGNMENT.to_string()]
        }
        fn output(&self) -> String {
            CALIBRATION.to_string()
        }
        fn derive(
            &self,
            ctx: &UpdateContext<'_>,
        ) -> Result<Condition> {
            // valid for the 100ns window around the event time only
            let window = ctx.event_time().as_nanos() / 100 * 100;
            Ok(Condition::new(
                ValidityInterval::new(EventTime(window), EventTime(window + 100)).unwrap(),
            )
            .with_param("Window", ParamValue::Int(window as i64)))
        }
    }

    let store = InMemoryStore::new();
    store.insert(
        ALIGNMENT,
        Condition::new(iov(0, 1000)).with_param("Shift", ParamValue::Double(0.1)),
    );
    let manager = started_manager(Arc::new(store));
    manager.push(Box::new(WindowedDerivation)).unwrap();

    manager.new_event(EventTime(50)).unwrap();
    let derived = manager.condition(CALIBRATION).unwrap();
    assert_eq!(derived.validity(), iov(0, 100));
    assert_eq!(derived.param::<i64>("Window").unwrap(), 0);
    // the published interval is bounded by the derived item, not the source
    assert_eq!(manager.head_interval(), iov(0, 100));

    // the source still covers 150; the derived window does not
    manager.new_event(EventTime(150)).unwrap();
    let derived = manager.condition(CALIBRATION).unwrap();
    assert!(derived.validity().contains(EventTime(150)));
    assert_eq!(derived.param::<i64>("Window").unwrap(), 100);
    assert_eq!(manager.head_interval(), iov(100, 200));
}

#[test]
fn test_duplicate_derivation_output_is_rejected() {
    let manager = started_manager(derivation_store());
    manager.push(Box::new(GainDerivation)).unwrap();

    let e = manager.push(Box::new(GainDerivation)).unwrap_err();
    assert!(matches!(
        e,
        Error::Condition(ConditionError::AlreadyRegistered { .. })
    ));
}

#[test]
fn test_failing_derivation_aborts_the_pass() {
    struct BrokenDerivation;
    impl ConditionDerivation for BrokenDerivation {
        fn inputs(&self) -> Vec<String> {
            vec![ALIGNMENT.to_string()]
        }
        fn output(&self) -> String {
            CALIBRATION.to_string()
        }
        fn derive(
            &self,
            _ctx: &UpdateContext<'_>,
        ) -> Result<Condition> {
            Err(Error::Fatal("no fit converged".into()))
        }
    }

    let manager = started_manager(derivation_store());
    manager.push(Box::new(BrokenDerivation)).unwrap();

    assert!(manager.new_event(EventTime(60)).is_err());
}

// ---
// Overrides and configuration

#[test]
fn test_condition_override_is_applied_on_every_load() {
    let config = ManagerConfig {
        condition_overrides: vec![format!("{ALIGNMENT} := double Shift = 9.9")],
        ..Default::default()
    };
    let manager = UpdateManager::new(alignment_store(), config).unwrap();
    manager.start().unwrap();
    let (_, slot, _) = register_counting_consumer(&manager);

    manager.new_event(EventTime(50)).unwrap();
    assert_eq!(slot.load_full().unwrap().param::<f64>("Shift").unwrap(), 9.9);

    manager.new_event(EventTime(150)).unwrap();
    assert_eq!(slot.load_full().unwrap().param::<f64>("Shift").unwrap(), 9.9);
}

#[test]
fn test_malformed_override_fails_construction() {
    let config = ManagerConfig {
        condition_overrides: vec!["gibberish".into()],
        ..Default::default()
    };

    let e = UpdateManager::new(alignment_store(), config).unwrap_err();
    assert!(matches!(
        e,
        Error::Condition(ConditionError::InvalidOverride { .. })
    ));
}

#[test]
fn test_dump_writes_the_graph_in_dot_format() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("graphs").join("conditions.dot");
    let config = ManagerConfig {
        dump_path: Some(dump.clone()),
        ..Default::default()
    };
    let manager = UpdateManager::new(alignment_store(), config).unwrap();
    manager.start().unwrap();
    register_counting_consumer(&manager);
    manager.new_event(EventTime(50)).unwrap();

    manager.dump().unwrap();

    let dot = std::fs::read_to_string(&dump).unwrap();
    assert!(dot.starts_with("digraph ConditionsGraph {"));
    assert!(dot.contains(ALIGNMENT));
    assert!(dot.contains("AlignmentUser"));
    assert!(dot.contains("->"));
}

#[test]
fn test_dump_without_configured_path() {
    let manager = started_manager(alignment_store());

    let e = manager.dump().unwrap_err();
    assert!(matches!(e, Error::System(SystemError::NoDumpPath)));
}

// ---
// Incidents and lifecycle

#[test]
fn test_begin_event_incident_drives_new_event() {
    let manager = started_manager(alignment_store());
    let (_, slot, _) = register_counting_consumer(&manager);

    manager
        .handle(&Incident::BeginEvent { time: EventTime(50) })
        .unwrap();

    assert!(slot.load_full().is_some());
}

#[test]
fn test_begin_event_incident_ignored_when_disabled() {
    let config = ManagerConfig {
        begin_event_incidents: false,
        ..Default::default()
    };
    let manager = UpdateManager::new(alignment_store(), config).unwrap();
    manager.start().unwrap();
    let (_, slot, _) = register_counting_consumer(&manager);

    manager
        .handle(&Incident::BeginEvent { time: EventTime(50) })
        .unwrap();

    assert!(slot.load_full().is_none());
}

#[test]
fn test_store_cleared_incident_purges() {
    let store = alignment_store();
    let manager = started_manager(store.clone());
    register_counting_consumer(&manager);
    manager.new_event(EventTime(50)).unwrap();

    store.remove(ALIGNMENT);
    manager.handle(&Incident::StoreCleared).unwrap();

    assert!(manager.condition(ALIGNMENT).is_err());
}

#[test]
fn test_finalize_clears_the_graph() {
    let manager = started_manager(alignment_store());
    register_counting_consumer(&manager);
    manager.new_event(EventTime(50)).unwrap();

    manager.finalize();

    assert!(manager.condition(ALIGNMENT).is_err());
    assert!(matches!(
        manager.new_event(EventTime(50)).unwrap_err(),
        Error::System(SystemError::NotStarted)
    ));
}
