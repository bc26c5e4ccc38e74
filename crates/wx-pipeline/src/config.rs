//! Cycle tuning knobs

use serde::Serialize;
use std::time::Duration;
use wx_core::Timestamp;

const HOUR: u64 = 3600;

/// Fetch window, chunking and retry settings for one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    /// Trailing window re-fetched before the watermark on every cycle
    pub backfill: Duration,
    /// Nothing earlier than this is ever requested
    pub not_before: Timestamp,
    /// Station window chunk, committed independently
    pub station_chunk: Duration,
    /// How far ahead the forecast snapshot is kept
    pub forecast_horizon: Duration,
    /// Bound on a single chunk fetch
    pub fetch_timeout: Duration,
    /// Extra attempts for a retryable chunk failure
    pub fetch_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backfill: Duration::from_secs(72 * HOUR),
            not_before: 0,
            station_chunk: Duration::from_secs(24 * HOUR),
            forecast_horizon: Duration::from_secs(120 * HOUR),
            fetch_timeout: Duration::from_secs(20),
            fetch_retries: 1,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Station window start for a cycle at `now`
    ///
    /// `[max(watermark - backfill, not_before), now]`, starting from `now`
    /// when no watermark exists yet. Never starts after `now`.
    pub fn station_since(&self, watermark: Option<Timestamp>, now: Timestamp) -> Timestamp {
        watermark
            .unwrap_or(now)
            .saturating_sub(secs(self.backfill))
            .max(self.not_before)
            .min(now)
    }

    pub fn station_chunk_secs(&self) -> i64 {
        secs(self.station_chunk).max(1)
    }

    pub fn forecast_horizon_secs(&self) -> i64 {
        secs(self.forecast_horizon)
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
