mod config;
mod constants;
mod core;
mod errors;
mod incident;
mod metrics;
mod run_change;
mod store;
pub mod utils;

pub use crate::core::*;

pub use config::*;
pub use errors::*;
pub use incident::*;
pub use metrics::*;
pub use run_change::*;
pub use store::*;
