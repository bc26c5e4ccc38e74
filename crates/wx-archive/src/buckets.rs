//! Bucket boundary math

use crate::{ArchiveError, ArchiveResult};
use std::collections::BTreeSet;
use wx_core::Timestamp;

/// Width of a station aggregate bucket: 3 hours
pub const BUCKET_SECONDS: i64 = 3 * 60 * 60;

/// A half-open window `[start, start + width)` aligned to the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    start: Timestamp,
    width: i64,
}

impl Bucket {
    /// The 3-hour bucket containing `timestamp`
    pub fn containing(timestamp: Timestamp) -> Self {
        Self::containing_with_width(timestamp, BUCKET_SECONDS)
    }

    /// Bucket of arbitrary width containing `timestamp`
    ///
    /// Uses floor division, so timestamps before the epoch still floor
    /// downwards. `width` must be positive.
    pub fn containing_with_width(timestamp: Timestamp, width: i64) -> Self {
        Self {
            start: timestamp - timestamp.rem_euclid(width),
            width,
        }
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Exclusive end of the bucket
    pub fn end(&self) -> Timestamp {
        self.start + self.width
    }

    /// Last second inside the bucket, for inclusive range queries
    pub fn last(&self) -> Timestamp {
        self.end() - 1
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.start <= timestamp && timestamp < self.end()
    }
}

/// Check a bucket width is usable
pub fn validate_width(width: i64) -> ArchiveResult<i64> {
    if width <= 0 {
        return Err(ArchiveError::InvalidInterval(width));
    }
    Ok(width)
}

/// Distinct buckets the timestamps fall into, ascending
pub fn affected_buckets(
    timestamps: impl IntoIterator<Item = Timestamp>,
    width: i64,
) -> Vec<Bucket> {
    timestamps
        .into_iter()
        .map(|ts| Bucket::containing_with_width(ts, width))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
