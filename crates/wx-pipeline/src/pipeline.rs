//! The ingestion cycle state machine

use crate::config::PipelineConfig;
use crate::summary::{
    CycleOutcome, CycleState, CycleSummary, FailureReason, SourceStatus, SourceSummary,
};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use wx_archive::{AggregationReport, BucketAggregator};
use wx_core::{to_datetime, SourceId, Timestamp, Timestamped, Watermark};
use wx_db::TimeSeriesStore;
use wx_ingest::{
    FetchReport, ForecastClient, IngestError, IngestResult, SourceClient, StationClient,
    TimeRange,
};

/// Forecast rows this far in the past are still refreshed
const FORECAST_LOOKBACK: i64 = 3 * 3600;

/// Mutable bookkeeping of a cycle in flight
struct CycleRun {
    states: Vec<CycleState>,
    station_window: Option<TimeRange>,
    station: SourceSummary,
    forecast: SourceSummary,
    aggregation: AggregationReport,
    touched: Vec<Timestamp>,
}

impl CycleRun {
    fn new(forecast_enabled: bool) -> Self {
        Self {
            states: vec![CycleState::Idle],
            station_window: None,
            station: SourceSummary::skipped(),
            forecast: if forecast_enabled {
                SourceSummary::skipped()
            } else {
                SourceSummary::disabled()
            },
            aggregation: AggregationReport::default(),
            touched: Vec::new(),
        }
    }

    fn enter(&mut self, state: CycleState) {
        debug!(?state, "Cycle state transition");
        self.states.push(state);
    }

    fn finish(mut self, outcome: CycleOutcome) -> CycleSummary {
        self.enter(if outcome.is_committed() {
            CycleState::Committed
        } else {
            CycleState::Failed
        });
        CycleSummary {
            outcome,
            states: self.states,
            station_window: self.station_window,
            station: self.station,
            forecast: self.forecast,
            aggregation: self.aggregation,
        }
    }
}

/// Runs ingestion cycles for one station and at most one forecast source
pub struct IngestPipeline {
    store: TimeSeriesStore,
    aggregator: BucketAggregator,
    station: StationClient,
    forecast: Option<ForecastClient>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl IngestPipeline {
    pub fn new(store: TimeSeriesStore, station: StationClient, config: PipelineConfig) -> Self {
        Self {
            aggregator: BucketAggregator::new(store.clone()),
            store,
            station,
            forecast: None,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_forecast(mut self, forecast: ForecastClient) -> Self {
        self.forecast = Some(forecast);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the cycle at the next chunk boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one cycle against the wall clock
    pub async fn run_cycle(&self) -> CycleSummary {
        self.run_cycle_at(Utc::now().timestamp()).await
    }

    /// Run one cycle as if the current time were `now`
    #[instrument(skip(self), fields(station = self.station.name()))]
    pub async fn run_cycle_at(&self, now: Timestamp) -> CycleSummary {
        let mut run = CycleRun::new(self.forecast.is_some());

        let outcome = match self.cycle(now, &mut run).await {
            Ok(()) => CycleOutcome::Committed,
            Err(reason) => CycleOutcome::Failed { reason },
        };

        match &outcome {
            CycleOutcome::Committed => info!(
                station_records = run.station.records,
                forecast_records = run.forecast.records,
                buckets = run.aggregation.buckets_written,
                "Cycle committed"
            ),
            CycleOutcome::Failed { reason } => error!(
                reason = %reason,
                station_records = run.station.records,
                "Cycle failed, watermarks unchanged"
            ),
        }

        run.finish(outcome)
    }

    async fn cycle(&self, now: Timestamp, run: &mut CycleRun) -> Result<(), FailureReason> {
        let watermark = self.store.get_watermark(SourceId::Station).await?;
        let since = self.config.station_since(watermark, now);
        let window = TimeRange { since, until: now };
        run.station_window = Some(window);

        run.enter(CycleState::FetchingStation);
        self.fetch_station(window, run).await?;

        run.enter(CycleState::FetchingForecast);
        self.fetch_forecast(now, run).await?;

        run.enter(CycleState::Aggregating);
        run.aggregation = self
            .aggregator
            .recompute_buckets(run.touched.iter().copied())
            .await?;

        if self.cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }

        let mut watermarks = Vec::with_capacity(2);
        if run.station.succeeded() {
            watermarks.push(Watermark::new(SourceId::Station, now));
        }
        if run.forecast.succeeded() {
            watermarks.push(Watermark::new(SourceId::Forecast, now));
        }
        if watermarks.is_empty() {
            return Err(FailureReason::AllSourcesFailed);
        }

        let committed_at = to_datetime(now).unwrap_or_else(Utc::now);
        self.store.commit_watermarks(&watermarks, committed_at).await?;
        Ok(())
    }

    /// Fetch the station window chunk by chunk, committing each chunk
    async fn fetch_station(&self, window: TimeRange, run: &mut CycleRun) -> Result<(), FailureReason> {
        run.station = SourceSummary::attempted(window);

        for chunk in window.split(self.config.station_chunk_secs()) {
            if self.cancel.is_cancelled() {
                warn!(since = chunk.since, "Cancelled before station chunk");
                break;
            }

            match self.fetch_with_retry(self.station.as_ref(), chunk).await {
                Ok(report) => {
                    self.store.upsert_raw(&report.records).await?;
                    run.touched
                        .extend(report.records.iter().map(Timestamped::timestamp));
                    run.station.record_fetch(&report);
                }
                Err(err) => {
                    warn!(
                        since = chunk.since,
                        until = chunk.until,
                        error = %err,
                        "Station chunk failed"
                    );
                    run.station.record_failure(&err);
                }
            }
        }

        if self.cancel.is_cancelled() && run.station.chunks_ok == 0 && run.station.chunks_failed == 0 {
            run.station.status = SourceStatus::Skipped;
        }
        Ok(())
    }

    /// Fetch and store the forecast snapshot, if a forecast source is configured
    async fn fetch_forecast(&self, now: Timestamp, run: &mut CycleRun) -> Result<(), FailureReason> {
        let Some(client) = self.forecast.as_ref() else {
            debug!("No forecast source configured");
            return Ok(());
        };
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let window = TimeRange {
            since: now.saturating_sub(FORECAST_LOOKBACK),
            until: now.saturating_add(self.config.forecast_horizon_secs()),
        };
        run.forecast = SourceSummary::attempted(window);

        match self.fetch_with_retry(client.as_ref(), window).await {
            Ok(report) => {
                self.store.replace_forecast(&report.records).await?;
                run.forecast.record_fetch(&report);
            }
            Err(err) => {
                warn!(error = %err, "Forecast fetch failed");
                run.forecast.record_failure(&err);
            }
        }
        Ok(())
    }

    /// Fetch `range`, bounded by the fetch timeout and retried on transient errors
    async fn fetch_with_retry<R>(
        &self,
        client: &dyn SourceClient<Record = R>,
        range: TimeRange,
    ) -> IngestResult<FetchReport<R>>
    where
        R: Timestamped + Send + Sync + 'static,
    {
        let timeout = self.config.fetch_timeout;
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(timeout, client.fetch(range.since, range.until)).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::Timeout(timeout)),
            };

            match result {
                Err(err) if err.is_retryable() && attempt < self.config.fetch_retries => {
                    attempt += 1;
                    warn!(
                        source = client.name(),
                        attempt,
                        error = %err,
                        "Retrying fetch"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(err),
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
                other => return other,
            }
        }
    }
}
