//! The conditions update manager.
//!
//! Maintains the item dependency graph, runs the validity-gated update pass
//! when event time advances, and arbitrates between concurrent readers and
//! the exclusive update through the IOV reservation lock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::graph::DependencyGraph;
use crate::core::item::ItemId;
use crate::core::item::ItemKind;
use crate::metrics;
use crate::utils::file_io::create_parent_dir_if_not_exist;
use crate::Condition;
use crate::ConditionDerivation;
use crate::ConditionError;
use crate::ConditionStore;
use crate::CondIOVResource;
use crate::ConsumerId;
use crate::DerivationId;
use crate::Error;
use crate::IOVLock;
use crate::EventTime;
use crate::Incident;
use crate::IncidentHandler;
use crate::ManagerConfig;
use crate::OverrideEntry;
use crate::Result;
use crate::SystemError;
use crate::UpdateContext;
use crate::ValidityInterval;

/// Destination slot for a loaded condition, the counterpart of the
/// `destPtr` registration argument: the manager refreshes it on every
/// reload and readers pick the object up lock-free.
pub type ConditionSlot = Arc<ArcSwapOption<Condition>>;

/// Everything guarded by the shared/exclusive state lock.
pub(crate) struct ManagerState {
    pub(crate) graph: DependencyGraph,
    /// Current object per path, the pinned view handed to readers.
    pub(crate) loaded: HashMap<String, Arc<Condition>>,
    derivations: HashMap<DerivationId, Box<dyn ConditionDerivation>>,
    next_derivation: u64,
    next_consumer: u64,
    last_event: Option<EventTime>,
    /// Validity intersection computed by the latest pass. Reservations read
    /// it under the shared guard, so it stays consistent with the pinned
    /// view even while the lock-free snapshot is being reset concurrently.
    pub(crate) head: ValidityInterval,
}

/// Carrier for the recompute step, extracted from the item kind so the
/// graph borrow can be released before store and callback calls.
enum RecomputePlan {
    LoadSource { path: String },
    RunDerivation { path: String, id: DerivationId },
    RunConsumer,
}

impl std::fmt::Debug for UpdateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub struct UpdateManager {
    state: Arc<RwLock<ManagerState>>,
    /// Serializes only the decision of whether a reservation must wait for
    /// an update pass, never the shared access itself.
    reserve_mutex: Mutex<()>,
    /// Intersection of every item's validity, published after every pass
    /// for the lock-free fast accept path of `new_event`. Derived items can
    /// be narrower than the sources feeding them, so the snapshot must
    /// cover the whole graph or the fast path would accept stale items.
    head_iov: ArcSwap<ValidityInterval>,
    store: Arc<dyn ConditionStore>,
    config: ManagerConfig,
    overrides: HashMap<String, Vec<OverrideEntry>>,
    started: AtomicBool,
    recomputations: AtomicU64,
}

impl UpdateManager {
    /// Builds the manager over its data provider. Override strings are
    /// parsed here so a malformed entry fails the job at initialize.
    pub fn new(
        store: Arc<dyn ConditionStore>,
        config: ManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut overrides: HashMap<String, Vec<OverrideEntry>> = HashMap::new();
        for entry in &config.condition_overrides {
            let parsed = OverrideEntry::parse(entry)?;
            overrides.entry(parsed.path.clone()).or_default().push(parsed);
        }

        Ok(UpdateManager {
            state: Arc::new(RwLock::new(ManagerState {
                graph: DependencyGraph::new(),
                loaded: HashMap::new(),
                derivations: HashMap::new(),
                next_derivation: 0,
                next_consumer: 0,
                last_event: None,
                head: ValidityInterval::EMPTY,
            })),
            reserve_mutex: Mutex::new(()),
            head_iov: ArcSwap::from_pointee(ValidityInterval::EMPTY),
            store,
            config,
            overrides,
            started: AtomicBool::new(false),
            recomputations: AtomicU64::new(0),
        })
    }

    /// Verifies the data provider answers before any event is processed.
    /// An unavailable provider is a configuration error, fatal for the run.
    pub fn start(&self) -> Result<()> {
        if !self.store.ready() {
            return Err(Error::Fatal(format!(
                "data provider '{}' is not available",
                self.config.data_provider
            )));
        }
        info!(
            provider = %self.config.data_provider,
            iov_lock_location = %self.config.iov_lock_location,
            "update manager started"
        );
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Releases every item and clears the graph.
    pub fn finalize(&self) {
        self.started.store(false, Ordering::Release);
        let mut st = self.state.write();
        *st = ManagerState {
            graph: DependencyGraph::new(),
            loaded: HashMap::new(),
            derivations: HashMap::new(),
            next_derivation: st.next_derivation,
            next_consumer: st.next_consumer,
            last_event: None,
            head: ValidityInterval::EMPTY,
        };
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
        info!("update manager finalized, dependency graph cleared");
    }

    /// Registers a revalidation closure and returns the identity under
    /// which its condition dependencies are declared.
    pub fn register_consumer<F>(
        &self,
        name: &str,
        callback: F,
    ) -> ConsumerId
    where
        F: FnMut(&UpdateContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let mut st = self.state.write();
        let id = ConsumerId(st.next_consumer);
        st.next_consumer += 1;
        st.graph.create_consumer(id, name, Box::new(callback));
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
        debug!(consumer = name, "registered consumer");
        id
    }

    /// Declares that `consumer` depends on the condition at `path`.
    ///
    /// The path must resolve in the data provider, or be produced by an
    /// already registered item (a pushed derivation). An existing item for
    /// the path is reused, so any number of consumers can share one
    /// condition. If a slot is given it receives the loaded object on every
    /// reload.
    pub fn register_condition(
        &self,
        consumer: ConsumerId,
        path: &str,
        slot: Option<ConditionSlot>,
    ) -> Result<()> {
        let mut st = self.state.write();
        let consumer_item = *st
            .graph
            .of_owner(consumer)
            .first()
            .ok_or(ConditionError::UnknownConsumer(consumer))?;
        let producer = match st.graph.by_path(path) {
            Some(existing) => existing,
            None if self.store.exists(path) => st.graph.find_or_create_source(path),
            None => {
                return Err(ConditionError::NotFound {
                    path: path.to_string(),
                }
                .into());
            }
        };
        st.graph.link(producer, consumer_item)?;
        if let Some(slot) = slot {
            if let Some(current) = st.loaded.get(path) {
                slot.store(Some(current.clone()));
            }
            st.graph.item_mut(producer).slots.push(slot);
        }
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
        debug!(path, "registered condition dependency");
        Ok(())
    }

    /// Removes every item owned by `consumer`, unlinking it from parents
    /// and children.
    ///
    /// Removing an object that other live items still depend on silently
    /// loses their re-validation trigger; this is a long-standing caveat of
    /// the interface, kept as-is.
    pub fn unregister(
        &self,
        consumer: ConsumerId,
    ) {
        let mut st = self.state.write();
        for id in st.graph.of_owner(consumer) {
            st.graph.remove(id);
        }
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
        debug!(?consumer, "unregistered consumer");
    }

    /// Takes ownership of a derivation and wires its inputs into the graph.
    pub fn push(
        &self,
        derivation: Box<dyn ConditionDerivation>,
    ) -> Result<DerivationId> {
        let inputs = derivation.inputs();
        let output = derivation.output();
        for input in &inputs {
            if !self.store.exists(input) {
                return Err(ConditionError::NotFound {
                    path: input.clone(),
                }
                .into());
            }
        }

        let mut st = self.state.write();
        let id = DerivationId(st.next_derivation);
        let derived = st.graph.create_derived(&output, id)?;
        st.next_derivation += 1;
        for input in &inputs {
            let source = st.graph.find_or_create_source(input);
            st.graph.link(source, derived)?;
        }
        st.derivations.insert(id, derivation);
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
        debug!(?id, output, "pushed condition derivation");
        Ok(id)
    }

    /// Returns ownership of a pushed derivation and removes its item.
    pub fn pop(
        &self,
        id: DerivationId,
    ) -> Result<Box<dyn ConditionDerivation>> {
        let mut st = self.state.write();
        let derivation = st
            .derivations
            .remove(&id)
            .ok_or(ConditionError::UnknownDerivation(id))?;
        let output = derivation.output();
        if let Some(item) = st.graph.by_path(&output) {
            st.graph.remove(item);
        }
        st.loaded.remove(&output);
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
        debug!(?id, output, "popped condition derivation");
        Ok(derivation)
    }

    pub fn has_derivation(
        &self,
        id: DerivationId,
    ) -> bool {
        self.state.read().derivations.contains_key(&id)
    }

    /// Single entry point for the event loop: ensure every registered item
    /// is valid for `time`.
    ///
    /// A failure anywhere in the chain aborts the pass; the caller is
    /// expected to stop the run rather than proceed on inconsistent
    /// conditions.
    pub fn new_event(
        &self,
        time: EventTime,
    ) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            return Err(SystemError::NotStarted.into());
        }
        if self.head_iov.load().contains(time) {
            metrics::NEW_EVENT_FAST_PATH.inc();
            return Ok(());
        }
        let mut st = self.state.write();
        self.run_pass(&mut st, time)
    }

    /// `new_event` using the data provider's current event time.
    pub fn new_event_from_store(&self) -> Result<()> {
        let time = self.store.event_time().ok_or(SystemError::NoEventTime)?;
        self.new_event(time)
    }

    /// Force-expires the items of `consumer` so the next `new_event`
    /// recomputes them regardless of interval overlap.
    pub fn invalidate(
        &self,
        consumer: ConsumerId,
    ) {
        let mut st = self.state.write();
        for id in st.graph.of_owner(consumer) {
            Self::expire(&mut st, id);
        }
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
    }

    /// Force-expires the item producing `path`. Used by out-of-band
    /// invalidation triggers such as a run-change file swap.
    pub fn invalidate_path(
        &self,
        path: &str,
    ) {
        let mut st = self.state.write();
        match st.graph.by_path(path) {
            Some(id) => {
                Self::expire(&mut st, id);
                debug!(path, "condition invalidated");
            }
            None => warn!(path, "invalidate requested for unregistered condition"),
        }
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
    }

    fn expire(
        st: &mut ManagerState,
        id: ItemId,
    ) {
        let item = st.graph.item_mut(id);
        item.validity = ValidityInterval::EMPTY;
        item.dirty = true;
    }

    /// Immediate, synchronous recomputation of `consumer`'s items at the
    /// last seen event time. For objects created mid-event that need a
    /// condition value right away.
    pub fn force_update(
        &self,
        consumer: ConsumerId,
    ) -> Result<()> {
        let mut st = self.state.write();
        let time = st
            .last_event
            .or_else(|| self.store.event_time())
            .ok_or(SystemError::NoEventTime)?;
        let ids = st.graph.of_owner(consumer);
        if ids.is_empty() {
            return Err(ConditionError::UnknownConsumer(consumer).into());
        }
        for id in ids {
            st.graph.item_mut(id).dirty = true;
        }
        self.run_pass(&mut st, time)
    }

    /// Drops every source item whose backing object no longer exists in the
    /// data provider. Called when the transient store is cleared; orphaned
    /// entries are removed silently.
    pub fn purge(&self) {
        let mut st = self.state.write();
        let gone: Vec<(ItemId, String)> = st
            .graph
            .iter()
            .filter_map(|item| match &item.kind {
                ItemKind::Source { path } if !self.store.exists(path) => {
                    Some((item.id, path.clone()))
                }
                _ => None,
            })
            .collect();
        for (id, path) in gone {
            debug!(path, "purging condition without backing object");
            st.graph.remove(id);
            st.loaded.remove(&path);
        }
        self.head_iov.store(Arc::new(ValidityInterval::EMPTY));
    }

    /// Writes the dependency graph to the configured dot file.
    pub fn dump(&self) -> Result<()> {
        let path = self
            .config
            .dump_path
            .clone()
            .ok_or(SystemError::NoDumpPath)?;
        self.dump_to(&path)
    }

    /// Graphviz rendering of the graph, for offline inspection.
    pub fn dump_to(
        &self,
        path: &Path,
    ) -> Result<()> {
        let st = self.state.read();
        let mut out = String::from("digraph ConditionsGraph {\n");
        for item in st.graph.iter() {
            let shape = match &item.kind {
                ItemKind::Source { .. } => "box",
                ItemKind::Derived { .. } => "hexagon",
                ItemKind::Consumer { .. } => "ellipse",
            };
            out.push_str(&format!(
                "  n{} [label=\"{}\\n{}\", shape={}];\n",
                item.id,
                item.label(),
                item.validity,
                shape
            ));
            for &child in &item.children {
                out.push_str(&format!("  n{} -> n{};\n", item.id, child));
            }
        }
        out.push_str("}\n");

        create_parent_dir_if_not_exist(path)?;
        std::fs::write(path, out).map_err(SystemError::Io)?;
        info!(path = %path.display(), "dependency graph dumped");
        Ok(())
    }

    /// The current object for `path`, as of the latest update pass.
    pub fn condition(
        &self,
        path: &str,
    ) -> Result<Arc<Condition>> {
        self.state
            .read()
            .loaded
            .get(path)
            .cloned()
            .ok_or_else(|| {
                ConditionError::NotFound {
                    path: path.to_string(),
                }
                .into()
            })
    }

    /// Intersection of every item's validity after the latest pass.
    pub fn head_interval(&self) -> ValidityInterval {
        **self.head_iov.load()
    }

    /// Total item recomputations since construction.
    pub fn recomputations(&self) -> u64 {
        self.recomputations.load(Ordering::Relaxed)
    }

    /// One full update traversal: topological order, heads first, each item
    /// recomputed only when stale, force-expired, or fed by a parent whose
    /// value changed in this pass.
    fn run_pass(
        &self,
        st: &mut ManagerState,
        time: EventTime,
    ) -> Result<()> {
        st.last_event = Some(time);
        let order = st.graph.topological_order()?;
        let mut changed = vec![false; st.graph.capacity()];

        for id in order {
            let (parent_iov, parent_changed) = {
                let item = st.graph.item(id);
                let mut iov = ValidityInterval::FOREVER;
                let mut any = false;
                for &parent in &item.parents {
                    iov = iov.intersect(&st.graph.item(parent).validity);
                    any |= changed[parent];
                }
                (iov, any)
            };

            let needs = {
                let item = st.graph.item(id);
                item.dirty || parent_changed || !item.validity.contains(time)
            };
            if !needs {
                continue;
            }

            changed[id] = self.recompute(st, id, time, parent_iov, parent_changed)?;
        }

        let head_iov = st.graph.validity_intersection();
        debug_assert!(head_iov.contains(time));
        st.head = head_iov;
        self.head_iov.store(Arc::new(head_iov));
        debug!(%time, head_iov = %head_iov, "update pass complete");
        Ok(())
    }

    fn recompute(
        &self,
        st: &mut ManagerState,
        id: ItemId,
        time: EventTime,
        parent_iov: ValidityInterval,
        parent_changed: bool,
    ) -> Result<bool> {
        let plan = match &st.graph.item(id).kind {
            ItemKind::Source { path } => RecomputePlan::LoadSource { path: path.clone() },
            ItemKind::Derived { path, derivation } => RecomputePlan::RunDerivation {
                path: path.clone(),
                id: *derivation,
            },
            ItemKind::Consumer { .. } => RecomputePlan::RunConsumer,
        };

        let value_changed = match plan {
            RecomputePlan::LoadSource { path } => {
                let mut condition = self.store.load(&path, time)?;
                if let Some(entries) = self.overrides.get(&path) {
                    for entry in entries {
                        entry.apply(&mut condition);
                    }
                }
                let validity = condition.validity();
                if !validity.contains(time) {
                    return Err(ConditionError::NoValidInterval { path, time }.into());
                }
                metrics::CONDITION_RECOMPUTATIONS
                    .with_label_values(&["source"])
                    .inc();
                debug!(path, %validity, "condition loaded");
                Self::install(st, id, &path, condition, validity)
            }
            RecomputePlan::RunDerivation { path, id: derivation } => {
                let mut condition = {
                    let d = st
                        .derivations
                        .get(&derivation)
                        .ok_or(ConditionError::UnknownDerivation(derivation))?;
                    let ctx = UpdateContext::new(time, &st.loaded);
                    d.derive(&ctx)?
                };
                let validity = parent_iov.intersect(&condition.validity());
                condition.set_validity(validity);
                if !validity.contains(time) {
                    return Err(ConditionError::NoValidInterval { path, time }.into());
                }
                metrics::CONDITION_RECOMPUTATIONS
                    .with_label_values(&["derived"])
                    .inc();
                debug!(path, %validity, "condition derived");
                Self::install(st, id, &path, condition, validity)
            }
            RecomputePlan::RunConsumer => {
                let ManagerState { graph, loaded, .. } = st;
                if let ItemKind::Consumer { callback, .. } = &mut graph.item_mut(id).kind {
                    let ctx = UpdateContext::new(time, loaded);
                    (callback)(&ctx)?;
                }
                let item = st.graph.item_mut(id);
                item.validity = parent_iov;
                item.dirty = false;
                metrics::CONDITION_RECOMPUTATIONS
                    .with_label_values(&["consumer"])
                    .inc();
                // consumers have no value of their own; pass the parents'
                // change status through to any dependents
                parent_changed
            }
        };

        self.recomputations.fetch_add(1, Ordering::Relaxed);
        Ok(value_changed)
    }

    /// Publishes a freshly computed condition: item validity, destination
    /// slots, and the pinned view. Returns whether the payload changed
    /// relative to the previous object.
    fn install(
        st: &mut ManagerState,
        id: ItemId,
        path: &str,
        condition: Condition,
        validity: ValidityInterval,
    ) -> bool {
        let value_changed = st
            .loaded
            .get(path)
            .map(|old| !old.same_payload(&condition))
            .unwrap_or(true);
        let condition = Arc::new(condition);
        let item = st.graph.item_mut(id);
        item.validity = validity;
        item.dirty = false;
        for slot in &item.slots {
            slot.store(Some(condition.clone()));
        }
        st.loaded.insert(path.to_string(), condition);
        value_changed
    }
}

impl IncidentHandler for UpdateManager {
    fn handle(
        &self,
        incident: &Incident,
    ) -> Result<()> {
        match incident {
            Incident::BeginEvent { time } => {
                if !self.config.begin_event_incidents {
                    debug!("BeginEvent incidents disabled, expecting explicit new_event calls");
                    return Ok(());
                }
                self.new_event(*time)
            }
            Incident::RunChange { .. } => Ok(()),
            Incident::StoreCleared => {
                self.purge();
                Ok(())
            }
        }
    }
}

impl CondIOVResource for UpdateManager {
    /// Pins the conditions view valid at `time` for the caller.
    ///
    /// The narrow `reserve_mutex` serializes only the check of whether an
    /// update pass has to run first; shared holders proceed concurrently,
    /// while a needed pass waits for all of them to drain.
    fn reserve(
        &self,
        time: EventTime,
    ) -> Result<IOVLock> {
        if !self.started.load(Ordering::Acquire) {
            return Err(SystemError::NotStarted.into());
        }
        let _decide = self.reserve_mutex.lock();
        if !self.head_iov.load().contains(time) {
            self.new_event(time)?;
        }
        let guard = self.state.read_arc();
        metrics::IOV_RESERVATIONS.inc();
        // read the interval from the guarded state, not the snapshot: a
        // concurrent invalidation may reset the snapshot to EMPTY between
        // the pass and this point without touching the pinned view
        let interval = guard.head;
        Ok(IOVLock::new(interval, guard))
    }
}
