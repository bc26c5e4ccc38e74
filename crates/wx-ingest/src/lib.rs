//! Source clients for station observations and forecasts
//!
//! Every client maps its provider's payload onto the canonical
//! [`RawObservation`] or [`ForecastRecord`] before anything downstream sees
//! it. Long ranges are split into provider-sized chunks; a failed chunk is
//! logged and skipped so the rest of the range still arrives.

pub mod archive_file;
pub mod ecowitt_cloud;
pub mod ecowitt_lan;
pub mod http;
pub mod openweather;
pub mod window;

pub use archive_file::*;
pub use ecowitt_cloud::*;
pub use ecowitt_lan::*;
pub use openweather::*;
pub use window::*;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use wx_core::{ForecastRecord, RawObservation, Timestamp, Timestamped};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid range: since {since} is after until {until}")]
    InvalidRange { since: Timestamp, until: Timestamp },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Worth another attempt within the same cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::SourceUnavailable(_) | IngestError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IngestError::MalformedResponse(err.to_string())
        } else if err.is_builder() {
            IngestError::Config(err.to_string())
        } else {
            // timeouts, connection failures, HTTP error statuses
            IngestError::SourceUnavailable(err.without_url().to_string())
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Records of one provider call plus the number of entries dropped as malformed
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkBatch<R> {
    pub records: Vec<R>,
    pub malformed: usize,
}

impl<R> ChunkBatch<R> {
    pub fn new(records: Vec<R>, malformed: usize) -> Self {
        Self { records, malformed }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }
}

/// Result of fetching a whole range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchReport<R> {
    /// Ascending by timestamp, unique timestamps, all within the range
    pub records: Vec<R>,
    pub malformed: usize,
    pub chunks_ok: usize,
    pub chunks_failed: usize,
    pub last_error: Option<String>,
}

impl<R> Default for FetchReport<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            malformed: 0,
            chunks_ok: 0,
            chunks_failed: 0,
            last_error: None,
        }
    }
}

/// Capability to fetch normalized records for a time range
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    type Record: Timestamped + Send + Sync + 'static;

    /// Client name/identifier
    fn name(&self) -> &str;

    /// Widest range a single provider call may cover, in seconds
    fn max_span(&self) -> i64;

    /// Fetch one provider-sized chunk
    async fn fetch_chunk(&self, range: TimeRange) -> IngestResult<ChunkBatch<Self::Record>>;

    /// Fetch `[since, until]`, chunked to `max_span`
    ///
    /// Failed chunks are skipped and counted. Fails only when the range is
    /// invalid or every chunk failed.
    async fn fetch(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> IngestResult<FetchReport<Self::Record>> {
        let range = TimeRange::new(since, until)?;
        let mut report = FetchReport::default();
        let mut collected = Vec::new();
        let mut last_error = None;

        for chunk in range.split(self.max_span()) {
            match self.fetch_chunk(chunk).await {
                Ok(batch) => {
                    debug!(
                        source = self.name(),
                        since = chunk.since,
                        until = chunk.until,
                        records = batch.records.len(),
                        "Chunk fetched"
                    );
                    report.chunks_ok += 1;
                    report.malformed += batch.malformed;
                    collected.extend(batch.records);
                }
                Err(err) => {
                    warn!(
                        source = self.name(),
                        since = chunk.since,
                        until = chunk.until,
                        error = %err,
                        "Chunk fetch failed"
                    );
                    report.chunks_failed += 1;
                    report.last_error = Some(err.to_string());
                    last_error = Some(err);
                }
            }
        }

        if report.chunks_ok == 0 {
            if let Some(err) = last_error {
                return Err(err);
            }
        }

        report.records = collect_records(collected, range);
        Ok(report)
    }
}

/// Station variant of [`SourceClient`]
pub type StationClient = Box<dyn SourceClient<Record = RawObservation>>;

/// Forecast variant of [`SourceClient`]
pub type ForecastClient = Box<dyn SourceClient<Record = ForecastRecord>>;
