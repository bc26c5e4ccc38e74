//! Cycle outcome reporting

use serde::Serialize;
use std::fmt;
use wx_archive::{AggregationReport, ArchiveError};
use wx_db::DbError;
use wx_ingest::{FetchReport, IngestError, TimeRange};

/// States of one ingestion cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    FetchingStation,
    FetchingForecast,
    Aggregating,
    Committed,
    Failed,
}

/// Why a cycle ended without advancing any watermark
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    StorageUnavailable(String),
    AllSourcesFailed,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StorageUnavailable(msg) => write!(f, "storage unavailable: {msg}"),
            FailureReason::AllSourcesFailed => write!(f, "all sources failed"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<DbError> for FailureReason {
    fn from(err: DbError) -> Self {
        FailureReason::StorageUnavailable(err.to_string())
    }
}

impl From<ArchiveError> for FailureReason {
    fn from(err: ArchiveError) -> Self {
        FailureReason::StorageUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Committed,
    Failed { reason: FailureReason },
}

impl CycleOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CycleOutcome::Committed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Every chunk succeeded
    Succeeded,
    /// Some chunks failed, at least one succeeded
    Partial,
    Failed,
    /// Not attempted because the cycle was cancelled first
    Skipped,
    /// No client configured
    Disabled,
}

/// Per-source fetch accounting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub status: SourceStatus,
    pub window: Option<TimeRange>,
    /// Records stored
    pub records: usize,
    pub malformed: usize,
    /// Provider calls that succeeded or failed; a pipeline chunk that failed
    /// as a whole counts once
    pub chunks_ok: usize,
    pub chunks_failed: usize,
    pub last_error: Option<String>,
}

impl SourceSummary {
    pub fn skipped() -> Self {
        Self {
            status: SourceStatus::Skipped,
            window: None,
            records: 0,
            malformed: 0,
            chunks_ok: 0,
            chunks_failed: 0,
            last_error: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: SourceStatus::Disabled,
            ..Self::skipped()
        }
    }

    pub(crate) fn attempted(window: TimeRange) -> Self {
        Self {
            status: SourceStatus::Failed,
            window: Some(window),
            ..Self::skipped()
        }
    }

    pub(crate) fn record_fetch<R>(&mut self, report: &FetchReport<R>) {
        self.records += report.records.len();
        self.malformed += report.malformed;
        self.chunks_ok += report.chunks_ok;
        self.chunks_failed += report.chunks_failed;
        if report.last_error.is_some() {
            self.last_error.clone_from(&report.last_error);
        }
        self.settle();
    }

    pub(crate) fn record_failure(&mut self, err: &IngestError) {
        self.chunks_failed += 1;
        self.last_error = Some(err.to_string());
        self.settle();
    }

    fn settle(&mut self) {
        self.status = match (self.chunks_ok, self.chunks_failed) {
            (0, _) => SourceStatus::Failed,
            (_, 0) => SourceStatus::Succeeded,
            _ => SourceStatus::Partial,
        };
    }

    /// The source delivered at least part of its window
    pub fn succeeded(&self) -> bool {
        matches!(self.status, SourceStatus::Succeeded | SourceStatus::Partial)
    }
}

/// What one cycle did, returned to the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub outcome: CycleOutcome,
    /// State trace, `Idle` first and the terminal state last
    pub states: Vec<CycleState>,
    pub station_window: Option<TimeRange>,
    pub station: SourceSummary,
    pub forecast: SourceSummary,
    pub aggregation: AggregationReport,
}

impl CycleSummary {
    pub fn is_committed(&self) -> bool {
        self.outcome.is_committed()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            CycleOutcome::Committed => None,
            CycleOutcome::Failed { reason } => Some(reason),
        }
    }
}
