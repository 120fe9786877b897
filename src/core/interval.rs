//! Event time and validity interval primitives.
//!
//! Every condition carries an interval of validity (IOV) expressed in
//! absolute event time. The whole engine reduces to one question: does the
//! interval cached for an item still cover the current event time?

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::time::get_now_as_ns;
use crate::ConditionError;
use crate::Result;

/// Monotonic event timestamp, nanoseconds since the unix epoch.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventTime(pub u64);

impl EventTime {
    pub const MIN: EventTime = EventTime(u64::MIN);
    pub const MAX: EventTime = EventTime(u64::MAX);

    /// Wall-clock now, for jobs processing live data.
    pub fn now() -> Self {
        EventTime(get_now_as_ns())
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Half-open validity window `[since, until)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityInterval {
    pub since: EventTime,
    pub until: EventTime,
}

impl ValidityInterval {
    /// The empty interval; an item carrying it is stale for every event time.
    pub const EMPTY: ValidityInterval = ValidityInterval {
        since: EventTime::MIN,
        until: EventTime::MIN,
    };

    /// The unbounded interval, neutral element of [`Self::intersect`].
    pub const FOREVER: ValidityInterval = ValidityInterval {
        since: EventTime::MIN,
        until: EventTime::MAX,
    };

    /// Builds an interval, rejecting `since > until`.
    pub fn new(
        since: EventTime,
        until: EventTime,
    ) -> Result<Self> {
        if since > until {
            return Err(ConditionError::InvalidInterval { since, until }.into());
        }
        Ok(ValidityInterval { since, until })
    }

    pub fn contains(
        &self,
        time: EventTime,
    ) -> bool {
        self.since <= time && time < self.until
    }

    pub fn is_empty(&self) -> bool {
        self.since >= self.until
    }

    /// Intersection of two windows; disjoint inputs collapse to `EMPTY`.
    pub fn intersect(
        &self,
        other: &ValidityInterval,
    ) -> ValidityInterval {
        let since = self.since.max(other.since);
        let until = self.until.min(other.until);
        if since >= until {
            return ValidityInterval::EMPTY;
        }
        ValidityInterval { since, until }
    }
}

impl fmt::Display for ValidityInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.since, self.until)
    }
}
