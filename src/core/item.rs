//! Graph nodes: one `Item` per registered condition-consumer binding.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::Condition;
use crate::ConditionError;
use crate::DerivationId;
use crate::EventTime;
use crate::Result;
use crate::ValidityInterval;

/// Index of an item inside the graph arena.
pub(crate) type ItemId = usize;

/// Opaque identity of a registered consumer, handed out by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub(crate) u64);

/// Revalidation closure bound to a consumer. Replaces the member-function
/// pointer binding of older conditions frameworks: the closure captures the
/// target object and reads its fresh dependencies through the context.
pub type UpdateFn = Box<dyn FnMut(&UpdateContext<'_>) -> Result<()> + Send + Sync>;

/// What an item stands for. A closed set: the scheduler matches on it
/// exhaustively instead of downcasting.
pub(crate) enum ItemKind {
    /// Backed by an object in the data provider, loaded on demand.
    /// Sources have no parents; they are the heads of the graph.
    Source { path: String },

    /// Produced by a registered [`ConditionDerivation`] from its inputs.
    ///
    /// [`ConditionDerivation`]: crate::ConditionDerivation
    Derived {
        path: String,
        derivation: DerivationId,
    },

    /// A registered revalidation closure with no condition object of its own.
    Consumer { name: String, callback: UpdateFn },
}

impl fmt::Debug for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Source { path } => f.debug_struct("Source").field("path", path).finish(),
            ItemKind::Derived { path, derivation } => f
                .debug_struct("Derived")
                .field("path", path)
                .field("derivation", derivation)
                .finish(),
            ItemKind::Consumer { name, .. } => {
                f.debug_struct("Consumer").field("name", name).finish()
            }
        }
    }
}

/// One node of the dependency graph.
///
/// `parents` are the conditions this item depends on, `children` the items
/// depending on it. The validity interval starts out `EMPTY` so the first
/// `new_event` pass always computes the item.
pub(crate) struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
    pub owner: Option<ConsumerId>,
    pub validity: ValidityInterval,
    /// Force-expired out-of-band; recompute on the next pass regardless of
    /// interval overlap.
    pub dirty: bool,
    /// Destination slots filled with the loaded object (the `destPtr`
    /// registration argument of the original interface).
    pub slots: Vec<Arc<ArcSwapOption<Condition>>>,
    pub parents: Vec<ItemId>,
    pub children: Vec<ItemId>,
}

impl Item {
    pub(crate) fn new(
        id: ItemId,
        kind: ItemKind,
        owner: Option<ConsumerId>,
    ) -> Self {
        Item {
            id,
            kind,
            owner,
            validity: ValidityInterval::EMPTY,
            dirty: true,
            slots: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn path(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Source { path } | ItemKind::Derived { path, .. } => Some(path),
            ItemKind::Consumer { .. } => None,
        }
    }

    /// Label used for logging and the dot dump.
    pub(crate) fn label(&self) -> &str {
        match &self.kind {
            ItemKind::Source { path } | ItemKind::Derived { path, .. } => path,
            ItemKind::Consumer { name, .. } => name,
        }
    }
}

/// Read-only view handed to revalidation closures and derivations during an
/// update pass. Parents are guaranteed fresh for `event_time` when the
/// closure runs.
pub struct UpdateContext<'a> {
    time: EventTime,
    loaded: &'a HashMap<String, Arc<Condition>>,
}

impl<'a> UpdateContext<'a> {
    pub(crate) fn new(
        time: EventTime,
        loaded: &'a HashMap<String, Arc<Condition>>,
    ) -> Self {
        UpdateContext { time, loaded }
    }

    pub fn event_time(&self) -> EventTime {
        self.time
    }

    /// The current object for `path`, as loaded by this or an earlier pass.
    pub fn condition(
        &self,
        path: &str,
    ) -> Result<Arc<Condition>> {
        self.loaded
            .get(path)
            .cloned()
            .ok_or_else(|| ConditionError::NotFound { path: path.into() }.into())
    }
}
