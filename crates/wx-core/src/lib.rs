//! Core data types, units, and rollup calculations for the weather pipeline
//!
//! Everything downstream of a source client speaks these types: metric
//! units, Unix-second timestamps, one row per timestamp.

pub mod rollups;
pub mod types;
pub mod units;

pub use rollups::*;
pub use types::*;
pub use units::*;
