//! Conditions Update Engine Error Hierarchy
//!
//! Defines error types for the validity-gated conditions engine,
//! categorized by configuration, data access and consistency concerns.

use config::ConfigError;

use crate::ConsumerId;
use crate::DerivationId;
use crate::EventTime;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (file I/O, lifecycle)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Condition access and dependency-graph consistency failures
    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// Unrecoverable failures requiring the processing run to stop
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
#[doc(hidden)]
pub enum SystemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operations on the manager before `start()` succeeded
    #[error("Update manager has not been started.")]
    NotStarted,

    /// `new_event()` without an explicit time and no time from the provider
    #[error("No current event time available from the data provider.")]
    NoEventTime,

    /// No dump path configured for `dump()`
    #[error("No graph dump path configured.")]
    NoDumpPath,
}

#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    /// Path does not resolve to an object in the data provider
    #[error("Condition '{path}' not found in the data provider")]
    NotFound { path: String },

    /// The provider holds the object but no interval covers the event time
    #[error("Condition '{path}' has no validity interval covering event time {time}")]
    NoValidInterval { path: String, time: EventTime },

    /// Typed parameter access misses (the `ParamException` family)
    #[error("Parameter '{name}' not found")]
    ParamNotFound { name: String },

    /// Typed parameter access with the wrong type
    #[error("Parameter '{name}' is not of type {expected}")]
    ParamWrongType {
        name: String,
        expected: &'static str,
    },

    /// Defensive check: the item graph must stay acyclic
    #[error("Dependency cycle detected through condition '{path}'")]
    DependencyCycle { path: String },

    /// Registering a producer for a path that already has one
    #[error("An item producing '{path}' is already registered")]
    AlreadyRegistered { path: String },

    #[error("Unknown consumer {0:?}")]
    UnknownConsumer(ConsumerId),

    #[error("Unknown derivation {0:?}")]
    UnknownDerivation(DerivationId),

    /// Malformed `"path := type name = value"` override string
    #[error("Malformed condition override '{entry}': {reason}")]
    InvalidOverride { entry: String, reason: String },

    #[error("Invalid validity interval: since {since} is after until {until}")]
    InvalidInterval { since: EventTime, until: EventTime },

    /// Path templates must carry exactly one `%d` or `%s` placeholder
    #[error("Path template '{template}' must contain exactly one '%d' or '%s' placeholder")]
    InvalidTemplate { template: String },
}
