//! Time ranges, chunking and result collection

use crate::{IngestError, IngestResult};
use serde::Serialize;
use std::collections::BTreeMap;
use wx_core::{Timestamp, Timestamped};

/// Inclusive range `[since, until]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub since: Timestamp,
    pub until: Timestamp,
}

impl TimeRange {
    pub fn new(since: Timestamp, until: Timestamp) -> IngestResult<Self> {
        if since > until {
            return Err(IngestError::InvalidRange { since, until });
        }
        Ok(Self { since, until })
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.since <= timestamp && timestamp <= self.until
    }

    /// Seconds covered, counting both ends
    pub fn span(&self) -> i64 {
        self.until - self.since + 1
    }

    /// Consecutive chunks of at most `max_span` seconds covering the range
    ///
    /// A non-positive `max_span` yields the range itself.
    pub fn split(&self, max_span: i64) -> Vec<TimeRange> {
        if max_span <= 0 || self.span() <= max_span {
            return vec![*self];
        }

        let mut chunks = Vec::new();
        let mut start = self.since;
        while start <= self.until {
            let end = start.saturating_add(max_span - 1).min(self.until);
            chunks.push(TimeRange {
                since: start,
                until: end,
            });
            if end == self.until {
                break;
            }
            start = end + 1;
        }
        chunks
    }
}

/// Keep records inside `range`, one per timestamp (last seen wins), ascending
pub fn collect_records<R: Timestamped>(
    records: impl IntoIterator<Item = R>,
    range: TimeRange,
) -> Vec<R> {
    let mut by_time = BTreeMap::new();
    for record in records {
        let ts = record.timestamp();
        if range.contains(ts) {
            by_time.insert(ts, record);
        }
    }
    by_time.into_values().collect()
}
