mod derivation;
pub(crate) mod graph;
mod interval;
mod iov;
pub(crate) mod item;
pub(crate) mod manager;

pub use derivation::*;
pub use interval::*;
pub use iov::*;
pub use item::ConsumerId;
pub use item::UpdateContext;
pub use item::UpdateFn;
pub use manager::ConditionSlot;
pub use manager::UpdateManager;

#[cfg(test)]
mod iov_test;
#[cfg(test)]
mod manager_test;
