//! Time-series store for station, aggregate and forecast data
//!
//! SQLite via sqlx. Every write is one transaction per batch, so readers
//! never see half of a batch.

pub mod client;
pub mod queries;
pub mod schema;

pub use client::*;
pub use schema::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Cannot prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid metadata value for {key}: {value:?}")]
    InvalidMetadata { key: String, value: String },
}

pub type DbResult<T> = Result<T, DbError>;
