use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;

lazy_static! {
    pub static ref CONDITION_RECOMPUTATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "condition_recomputations",
            "Number of item recomputations per item kind"
        ),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref NEW_EVENT_FAST_PATH: IntCounter = IntCounter::new(
        "new_event_fast_path",
        "new_event calls answered from the cached head-interval snapshot"
    )
    .expect("metric can not be created");

    pub static ref IOV_RESERVATIONS: IntCounter = IntCounter::new(
        "iov_reservations",
        "Shared IOV reservations handed out to event threads"
    )
    .expect("metric can not be created");

    pub static ref RUN_CHANGE_CHECKS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "run_change_checks",
            "Run-change template evaluations by outcome"
        ),
        &["outcome"]
    )
    .expect("metric can not be created");
}

pub fn register_custom_metrics(registry: &Registry) {
    if let Err(e) = registry.register(Box::new(CONDITION_RECOMPUTATIONS.clone())) {
        error!("registering condition_recomputations failed: {:?}", e);
    }
    if let Err(e) = registry.register(Box::new(NEW_EVENT_FAST_PATH.clone())) {
        error!("registering new_event_fast_path failed: {:?}", e);
    }
    if let Err(e) = registry.register(Box::new(IOV_RESERVATIONS.clone())) {
        error!("registering iov_reservations failed: {:?}", e);
    }
    if let Err(e) = registry.register(Box::new(RUN_CHANGE_CHECKS.clone())) {
        error!("registering run_change_checks failed: {:?}", e);
    }
}
