// -
// Configuration defaults

/// Default name of the detector data provider service
pub(crate) const DEFAULT_DATA_PROVIDER: &str = "ConditionsDB";

/// Default transient-store location where the IOV lock is published
pub(crate) const DEFAULT_IOV_LOCK_LOCATION: &str = "/Transient/Conditions/IOVLock";

/// Default config file stem looked up by `Settings::load`
pub(crate) const DEFAULT_CONFIG_FILE: &str = "config/conditions";

/// Environment variable prefix for configuration overrides
pub(crate) const ENV_PREFIX: &str = "COND";

// -
// Override string syntax

/// Separator between condition path and typed assignment in an override entry
pub(crate) const OVERRIDE_ASSIGN: &str = ":=";
