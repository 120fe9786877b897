//! Registered computations producing derived conditions.

#[cfg(test)]
use mockall::automock;

use crate::Condition;
use crate::Result;
use crate::UpdateContext;

/// Identity of a pushed derivation; monotonically increasing per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivationId(pub(crate) u64);

/// A computation turning one or more source conditions into a derived one.
///
/// Ownership transfers to the manager on `push` and back to the caller on
/// `pop`. The scheduler runs `derive` only after every input is fresh for
/// the event time; the result's validity is clipped to the intersection of
/// the input validities.
#[cfg_attr(test, automock)]
pub trait ConditionDerivation: Send + Sync {
    /// Paths of the source conditions this derivation reads.
    fn inputs(&self) -> Vec<String>;

    /// Path under which the derived condition is published.
    fn output(&self) -> String;

    fn derive<'a>(
        &self,
        ctx: &UpdateContext<'a>,
    ) -> Result<Condition>;
}

impl std::fmt::Debug for dyn ConditionDerivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionDerivation")
            .field("output", &self.output())
            .finish()
    }
}
