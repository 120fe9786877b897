//! The data-provider seam between the engine and the conditions database.

use dashmap::DashMap;
use parking_lot::Mutex;

#[cfg(test)]
use mockall::automock;

use crate::Condition;
use crate::ConditionError;
use crate::EventTime;
use crate::Result;

/// What the update engine needs from the transient detector store: resolve
/// a path, load the object valid at a given event time, and (optionally)
/// report the time of the event being processed.
#[cfg_attr(test, automock)]
pub trait ConditionStore: Send + Sync {
    fn exists(
        &self,
        path: &str,
    ) -> bool;

    /// Loads the condition valid at `time`.
    ///
    /// Fails with `NotFound` for an unknown path and `NoValidInterval` when
    /// the path resolves but no stored interval covers `time`.
    fn load(
        &self,
        path: &str,
        time: EventTime,
    ) -> Result<Condition>;

    /// Time of the event currently being processed, if the provider tracks
    /// one.
    fn event_time(&self) -> Option<EventTime>;

    /// Provider availability probe, checked once at `start()`.
    fn ready(&self) -> bool {
        true
    }
}

/// An IOV-keyed in-memory conditions database.
///
/// Serves embedded jobs and tests; per-path slices are scanned in insertion
/// order, so overlapping intervals resolve to the earliest inserted slice.
#[derive(Default)]
pub struct InMemoryStore {
    conditions: DashMap<String, Vec<Condition>>,
    current_time: Mutex<Option<EventTime>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one validity slice for `path`.
    pub fn insert(
        &self,
        path: &str,
        condition: Condition,
    ) {
        self.conditions
            .entry(path.to_string())
            .or_default()
            .push(condition);
    }

    /// Drops every slice of `path`, as a store purge would.
    pub fn remove(
        &self,
        path: &str,
    ) {
        self.conditions.remove(path);
    }

    pub fn set_event_time(
        &self,
        time: EventTime,
    ) {
        *self.current_time.lock() = Some(time);
    }
}

impl ConditionStore for InMemoryStore {
    fn exists(
        &self,
        path: &str,
    ) -> bool {
        self.conditions.contains_key(path)
    }

    fn load(
        &self,
        path: &str,
        time: EventTime,
    ) -> Result<Condition> {
        let slices = self
            .conditions
            .get(path)
            .ok_or_else(|| ConditionError::NotFound {
                path: path.to_string(),
            })?;
        slices
            .iter()
            .find(|c| c.validity().contains(time))
            .cloned()
            .ok_or_else(|| {
                ConditionError::NoValidInterval {
                    path: path.to_string(),
                    time,
                }
                .into()
            })
    }

    fn event_time(&self) -> Option<EventTime> {
        *self.current_time.lock()
    }
}
