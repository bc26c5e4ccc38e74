//! Ingestion cycle orchestration
//!
//! One [`IngestPipeline::run_cycle`] call fetches the station window
//! (watermark minus backfill up to now), upserts every chunk as it arrives,
//! stores the forecast snapshot, recomputes the touched 3-hour buckets and
//! finally advances the watermarks of the sources that succeeded.

pub mod config;
pub mod pipeline;
pub mod summary;

pub use config::*;
pub use pipeline::*;
pub use summary::*;
