//! The condition dependency graph: items plus directed parent→child edges.
//!
//! Parents are dependencies, children are dependents. Items without parents
//! are always `Source` items backed by the data provider; every other item
//! sits below the sources feeding it. Registration keeps the graph acyclic
//! by construction, and the topological sort re-checks it defensively on
//! every pass.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::core::item::Item;
use crate::core::item::ItemId;
use crate::core::item::ItemKind;
use crate::ConditionError;
use crate::ConsumerId;
use crate::DerivationId;
use crate::Result;
use crate::UpdateFn;
use crate::ValidityInterval;

#[derive(Default)]
pub(crate) struct DependencyGraph {
    /// Arena of items; removed entries are tombstoned so ids stay stable.
    items: Vec<Option<Item>>,
    /// Path → producing item (`Source` or `Derived`).
    path_index: HashMap<String, ItemId>,
    /// Owner → items registered by that consumer.
    owner_index: HashMap<ConsumerId, Vec<ItemId>>,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Upper bound on item ids, for per-pass scratch vectors.
    pub(crate) fn capacity(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn item(
        &self,
        id: ItemId,
    ) -> &Item {
        self.items[id].as_ref().expect("tombstoned item accessed")
    }

    pub(crate) fn item_mut(
        &mut self,
        id: ItemId,
    ) -> &mut Item {
        self.items[id].as_mut().expect("tombstoned item accessed")
    }

    pub(crate) fn by_path(
        &self,
        path: &str,
    ) -> Option<ItemId> {
        self.path_index.get(path).copied()
    }

    pub(crate) fn of_owner(
        &self,
        owner: ConsumerId,
    ) -> Vec<ItemId> {
        self.owner_index.get(&owner).cloned().unwrap_or_default()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter_map(|slot| slot.as_ref())
    }

    fn insert(
        &mut self,
        kind: ItemKind,
        owner: Option<ConsumerId>,
    ) -> ItemId {
        let id = self.items.len();
        let item = Item::new(id, kind, owner);
        if let Some(path) = item.path() {
            self.path_index.insert(path.to_string(), id);
        }
        if let Some(owner) = owner {
            self.owner_index.entry(owner).or_default().push(id);
        }
        self.items.push(Some(item));
        id
    }

    /// Multiple consumers share one condition: an existing source for `path`
    /// is reused.
    pub(crate) fn find_or_create_source(
        &mut self,
        path: &str,
    ) -> ItemId {
        if let Some(id) = self.by_path(path) {
            return id;
        }
        self.insert(
            ItemKind::Source {
                path: path.to_string(),
            },
            None,
        )
    }

    pub(crate) fn create_consumer(
        &mut self,
        owner: ConsumerId,
        name: &str,
        callback: UpdateFn,
    ) -> ItemId {
        self.insert(
            ItemKind::Consumer {
                name: name.to_string(),
                callback,
            },
            Some(owner),
        )
    }

    /// A path may have at most one producer.
    pub(crate) fn create_derived(
        &mut self,
        path: &str,
        derivation: DerivationId,
    ) -> Result<ItemId> {
        if self.by_path(path).is_some() {
            return Err(ConditionError::AlreadyRegistered {
                path: path.to_string(),
            }
            .into());
        }
        Ok(self.insert(
            ItemKind::Derived {
                path: path.to_string(),
                derivation,
            },
            None,
        ))
    }

    /// Records `child` depending on `parent`. Idempotent; linking an item
    /// beneath itself is rejected as a cycle.
    pub(crate) fn link(
        &mut self,
        parent: ItemId,
        child: ItemId,
    ) -> Result<()> {
        if parent == child {
            return Err(ConditionError::DependencyCycle {
                path: self.item(parent).label().to_string(),
            }
            .into());
        }
        if self.item(parent).children.contains(&child) {
            return Ok(());
        }
        self.item_mut(parent).children.push(child);
        self.item_mut(child).parents.push(parent);
        Ok(())
    }

    /// Removes an item and every edge touching it.
    ///
    /// Children left behind lose their re-validation trigger for this
    /// dependency; removing an item that still has live children is
    /// dangerous and only done knowingly (purge, pop, unregister).
    pub(crate) fn remove(
        &mut self,
        id: ItemId,
    ) {
        let item = match self.items[id].take() {
            Some(item) => item,
            None => return,
        };
        for parent in &item.parents {
            if let Some(p) = self.items[*parent].as_mut() {
                p.children.retain(|&c| c != id);
            }
        }
        for child in &item.children {
            if let Some(c) = self.items[*child].as_mut() {
                c.parents.retain(|&p| p != id);
            }
        }
        if let Some(path) = item.path() {
            self.path_index.remove(path);
        }
        if let Some(owner) = item.owner {
            if let Some(owned) = self.owner_index.get_mut(&owner) {
                owned.retain(|&i| i != id);
                if owned.is_empty() {
                    self.owner_index.remove(&owner);
                }
            }
        }
    }

    /// Kahn's algorithm over the whole graph, sources first.
    ///
    /// Registration keeps the graph acyclic, so leftovers mean a consistency
    /// bug; they surface as `DependencyCycle` instead of hanging the pass.
    pub(crate) fn topological_order(&self) -> Result<Vec<ItemId>> {
        let mut indegree: HashMap<ItemId, usize> = HashMap::new();
        let mut queue: VecDeque<ItemId> = VecDeque::new();
        for item in self.iter() {
            indegree.insert(item.id, item.parents.len());
            if item.parents.is_empty() {
                queue.push_back(item.id);
            }
        }

        let mut order = Vec::with_capacity(indegree.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &child in &self.item(id).children {
                let d = indegree
                    .get_mut(&child)
                    .expect("child edge to tombstoned item");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != indegree.len() {
            let stuck = self
                .iter()
                .find(|item| !order.contains(&item.id))
                .map(|item| item.label().to_string())
                .unwrap_or_default();
            return Err(ConditionError::DependencyCycle { path: stuck }.into());
        }
        Ok(order)
    }

    /// Intersection of every live item's validity; `FOREVER` for an empty
    /// graph.
    ///
    /// Derived items may be strictly narrower than the sources feeding them,
    /// so the intersection must range over all items, not just the sources,
    /// to bound how far the current conditions view can be trusted.
    pub(crate) fn validity_intersection(&self) -> ValidityInterval {
        let mut iov = ValidityInterval::FOREVER;
        for item in self.iter() {
            iov = iov.intersect(&item.validity);
        }
        iov
    }
}
