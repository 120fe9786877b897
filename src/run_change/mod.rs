//! Run-change driven invalidation of file-backed conditions.
//!
//! On a run-number change the handler re-resolves each configured path
//! template and invalidates a condition only when the resolved file's
//! content hash actually differs, so long calibration validity periods do
//! not trigger needless reparsing.

mod handler;
mod hasher;
mod path_template;

pub use handler::*;
pub use hasher::*;
pub use path_template::*;
