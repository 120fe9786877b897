//! Framework notifications delivered to the engine's services.
//!
//! The incident hierarchy of the host framework is a small closed set, so
//! it is modelled as an enum and dispatched by exhaustive match rather than
//! by downcasting handler objects.

use crate::EventTime;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incident {
    /// The event loop is about to process an event with this time.
    BeginEvent { time: EventTime },

    /// The run number changed; file-backed conditions may need reloading.
    RunChange { run: u32 },

    /// The transient store was cleared; registered objects may be gone.
    StoreCleared,
}

/// A service notified by the event loop. A failure from `handle` means the
/// current run must stop rather than continue on inconsistent conditions.
pub trait IncidentHandler: Send + Sync {
    fn handle(
        &self,
        incident: &Incident,
    ) -> Result<()>;
}
