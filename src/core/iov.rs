//! IOV reservation: pinning a consistent conditions view for one event.
//!
//! Event threads take a shared reservation before touching any condition;
//! the update pass takes the same lock exclusively, so no reader ever
//! observes a half-swapped graph. Reservations are not cancellable and
//! carry no timeout: a stuck exclusive update blocks readers until it
//! finishes, which is acceptable for batch reconstruction jobs.

use std::sync::Arc;

use parking_lot::ArcRwLockReadGuard;
use parking_lot::RawRwLock;

use crate::core::manager::ManagerState;
use crate::Condition;
use crate::ConditionError;
use crate::EventTime;
use crate::Result;
use crate::ValidityInterval;

/// The reservation interface handed to concurrent event threads.
pub trait CondIOVResource: Send + Sync {
    /// Acquires a shared claim on the conditions view valid at `time`,
    /// running an update pass first if the current view does not cover it.
    /// The claim lasts exactly for the lifetime of the returned lock.
    fn reserve(
        &self,
        time: EventTime,
    ) -> Result<IOVLock>;
}

/// A live shared claim on the pinned IOV.
///
/// While any `IOVLock` is alive no update pass can swap conditions out;
/// dropping it releases the claim on every exit path.
pub struct IOVLock {
    interval: ValidityInterval,
    guard: ArcRwLockReadGuard<RawRwLock, ManagerState>,
}

impl std::fmt::Debug for IOVLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IOVLock")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl IOVLock {
    pub(crate) fn new(
        interval: ValidityInterval,
        guard: ArcRwLockReadGuard<RawRwLock, ManagerState>,
    ) -> Self {
        IOVLock { interval, guard }
    }

    /// The validity window pinned by this reservation.
    pub fn interval(&self) -> ValidityInterval {
        self.interval
    }

    /// Reads a condition from the pinned view.
    pub fn condition(
        &self,
        path: &str,
    ) -> Result<Arc<Condition>> {
        self.guard.loaded.get(path).cloned().ok_or_else(|| {
            ConditionError::NotFound {
                path: path.to_string(),
            }
            .into()
        })
    }
}
