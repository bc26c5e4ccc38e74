//! Station data aggregator
//!
//! Recomputes fixed 3-hour buckets from the raw rows stored in the
//! time-series store and writes them back as one batch.

pub mod aggregator;
pub mod buckets;

pub use aggregator::*;
pub use buckets::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] wx_db::DbError),

    #[error("Invalid bucket width: {0}")]
    InvalidInterval(i64),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
