//! Data-provider collaborators of the update engine.
//!
//! The engine never parses detector data itself; it asks a
//! [`ConditionStore`] for IOV-tagged [`Condition`] objects and only tracks
//! when they have to be reloaded.

mod condition;
mod provider;

pub use condition::*;
pub use provider::*;
