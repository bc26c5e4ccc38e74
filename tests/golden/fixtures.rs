//! Cycle fixtures and scripted source clients

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wx_core::{ForecastRecord, RawObservation, Timestamp, Timestamped};
use wx_ingest::{ChunkBatch, IngestError, IngestResult, SourceClient, TimeRange};

/// Source data and clock for one or more cycles
#[derive(Debug, Clone, Deserialize)]
pub struct CycleFixture {
    /// Clock passed to `run_cycle_at`
    pub now: Timestamp,
    pub station: Vec<RawObservation>,
    #[serde(default)]
    pub forecast: Vec<ForecastRecord>,
}

impl CycleFixture {
    /// Station readings without the ones at `timestamps`
    pub fn station_without(&self, timestamps: &[Timestamp]) -> Vec<RawObservation> {
        self.station
            .iter()
            .filter(|r| !timestamps.contains(&r.timestamp))
            .cloned()
            .collect()
    }
}

/// Load a cycle fixture
pub fn load_fixture(path: &Path) -> Result<CycleFixture> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture: {:?}", path))?;

    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse fixture JSON: {:?}", path))
}

/// Source client serving canned records, chunked like a provider would
pub struct ScriptedSource<R> {
    records: Vec<R>,
    max_span: i64,
    reversed: bool,
    unavailable: bool,
    cancel_after: Option<(usize, CancellationToken)>,
    calls: Arc<AtomicUsize>,
}

impl<R> ScriptedSource<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records,
            max_span: 3 * 3600,
            reversed: false,
            unavailable: false,
            cancel_after: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Serve each chunk newest first
    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    /// Fail every call as if the provider were down
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Cancel `token` once `calls` chunks have been served
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    /// Shared call counter
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl<R> SourceClient for ScriptedSource<R>
where
    R: Timestamped + Clone + Send + Sync + 'static,
{
    type Record = R;

    fn name(&self) -> &str {
        "scripted"
    }

    fn max_span(&self) -> i64 {
        self.max_span
    }

    async fn fetch_chunk(&self, range: TimeRange) -> IngestResult<ChunkBatch<R>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if call >= *after {
                token.cancel();
            }
        }
        if self.unavailable {
            return Err(IngestError::SourceUnavailable("scripted outage".into()));
        }

        let mut records: Vec<R> = self
            .records
            .iter()
            .filter(|r| range.contains(r.timestamp()))
            .cloned()
            .collect();
        if self.reversed {
            records.reverse();
        }
        Ok(ChunkBatch::new(records, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::GoldenTestConfig;

    #[test]
    fn test_load_fixture() {
        let fixture = GoldenTestConfig::default().load("two_buckets").unwrap();
        assert_eq!(fixture.station.len(), 6);
        assert_eq!(fixture.forecast.len(), 2);
        assert!(fixture.station.iter().all(|r| r.timestamp <= fixture.now));
    }

    #[tokio::test]
    async fn test_scripted_source_chunks() {
        let records: Vec<RawObservation> = (0..4).map(|i| RawObservation::new(i * 3600)).collect();
        let source = ScriptedSource::new(records).reversed();
        let calls = source.calls();

        let report = source.fetch(0, 4 * 3600).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let timestamps: Vec<Timestamp> = report.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![0, 3600, 7200, 10800]);
    }
}
