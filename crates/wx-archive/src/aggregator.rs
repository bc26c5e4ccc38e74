//! Bucket recomputation against the store

use crate::buckets::{affected_buckets, validate_width, Bucket, BUCKET_SECONDS};
use crate::ArchiveResult;
use serde::Serialize;
use tracing::{debug, info, instrument};
use wx_core::{aggregate_bucket, Timestamp};
use wx_db::TimeSeriesStore;

/// Outcome of one aggregation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregationReport {
    /// Distinct buckets the input timestamps fall into
    pub buckets_touched: usize,
    /// Buckets with at least one raw row, rewritten
    pub buckets_written: usize,
    /// Buckets with no raw rows, skipped
    pub buckets_empty: usize,
}

/// Outcome of a stored-data repair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Raw rows whose pressure was rescaled or cleared
    pub rows_repaired: usize,
    pub aggregation: AggregationReport,
}

/// Aggregator turning stored raw rows into bucket aggregates
pub struct BucketAggregator {
    width: i64,
    store: TimeSeriesStore,
}

impl BucketAggregator {
    /// Create an aggregator with 3-hour buckets
    pub fn new(store: TimeSeriesStore) -> Self {
        Self {
            width: BUCKET_SECONDS,
            store,
        }
    }

    /// Create an aggregator with a custom bucket width (seconds)
    pub fn with_width(width: i64, store: TimeSeriesStore) -> ArchiveResult<Self> {
        Ok(Self {
            width: validate_width(width)?,
            store,
        })
    }

    /// Recompute every bucket any of `timestamps` falls into
    ///
    /// Each bucket is rebuilt from all raw rows currently stored in it, not
    /// only the new ones, and the results are written as a single batch.
    /// Buckets outside the set are not touched.
    #[instrument(skip(self, timestamps))]
    pub async fn recompute_buckets(
        &self,
        timestamps: impl IntoIterator<Item = Timestamp>,
    ) -> ArchiveResult<AggregationReport> {
        let buckets = affected_buckets(timestamps, self.width);
        let mut report = AggregationReport {
            buckets_touched: buckets.len(),
            ..Default::default()
        };

        let mut aggregates = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            let rows = self.store.raw_range(bucket.start(), bucket.last()).await?;
            match aggregate_bucket(bucket.start(), &rows) {
                Some(aggregate) => aggregates.push(aggregate),
                None => {
                    debug!("Bucket {} has no raw rows, skipping", bucket.start());
                    report.buckets_empty += 1;
                }
            }
        }

        self.store.upsert_aggregates(&aggregates).await?;
        report.buckets_written = aggregates.len();

        info!(
            touched = report.buckets_touched,
            written = report.buckets_written,
            empty = report.buckets_empty,
            "Aggregation pass complete"
        );
        Ok(report)
    }

    /// Recompute every bucket holding raw rows within `[since, until]`
    pub async fn recompute_window(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> ArchiveResult<AggregationReport> {
        let timestamps = self.store.raw_timestamps(since, until).await?;
        self.recompute_buckets(timestamps).await
    }

    /// Repair stored pressure readings in `[since, until]` and rebuild the
    /// buckets of that window
    #[instrument(skip(self))]
    pub async fn repair_window(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> ArchiveResult<RepairReport> {
        let repaired = self.store.repair_pressure(since, until).await?;
        let aggregation = self.recompute_window(since, until).await?;

        info!(
            rows_repaired = repaired.len(),
            buckets = aggregation.buckets_written,
            "Repair complete"
        );
        Ok(RepairReport {
            rows_repaired: repaired.len(),
            aggregation,
        })
    }

    /// The bucket a timestamp belongs to under this aggregator's width
    pub fn bucket_of(&self, timestamp: Timestamp) -> Bucket {
        Bucket::containing_with_width(timestamp, self.width)
    }

    /// Get current bucket width
    pub fn width(&self) -> i64 {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wx_core::RawObservation;
    use wx_db::AggregateRow;

    const H: i64 = 3600;

    fn raw(ts: Timestamp, temp: f64, rain: f64) -> RawObservation {
        RawObservation {
            temperature_c: Some(temp),
            rain_mm: Some(rain),
            ..RawObservation::new(ts)
        }
    }

    async fn store_with(rows: &[RawObservation]) -> TimeSeriesStore {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        store.upsert_raw(rows).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_mean_and_sum() {
        // 00:10, 01:50, 02:30 all in [00:00, 03:00)
        let store = store_with(&[
            raw(10 * 60, 10.0, 1.0),
            raw(H + 50 * 60, 20.0, 2.0),
            raw(2 * H + 30 * 60, 30.0, 0.0),
        ])
        .await;
        let aggregator = BucketAggregator::new(store.clone());

        let report = aggregator.recompute_window(0, 3 * H).await.unwrap();
        assert_eq!(report.buckets_written, 1);

        let aggs = store.aggregate_range(0, 3 * H).await.unwrap();
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].bucket_start, 0);
        assert_eq!(aggs[0].temperature_c, Some(20.0));
        assert_eq!(aggs[0].rain_mm, Some(3.0));
        assert_eq!(aggs[0].sample_count, 3);
    }

    #[tokio::test]
    async fn test_late_row_corrects_bucket() {
        let store = store_with(&[raw(600, 10.0, 0.0), raw(4 * H, 5.0, 0.0)]).await;
        let aggregator = BucketAggregator::new(store.clone());
        aggregator.recompute_window(0, 6 * H).await.unwrap();
        let before = store.aggregate_range(3 * H, 6 * H).await.unwrap();

        store.upsert_raw(&[raw(1200, 20.0, 1.5)]).await.unwrap();
        aggregator.recompute_buckets([1200]).await.unwrap();

        let first = store.aggregate_range(0, 0).await.unwrap();
        assert_eq!(first[0].temperature_c, Some(15.0));
        assert_eq!(first[0].rain_mm, Some(1.5));
        assert_eq!(store.aggregate_range(3 * H, 6 * H).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_empty_bucket_not_written() {
        let store = store_with(&[raw(600, 10.0, 0.0)]).await;
        let aggregator = BucketAggregator::new(store.clone());

        let report = aggregator.recompute_buckets([600, 7 * H]).await.unwrap();

        insta::assert_debug_snapshot!(report, @r###"
        AggregationReport {
            buckets_touched: 2,
            buckets_written: 1,
            buckets_empty: 1,
        }
        "###);
        assert_eq!(store.count::<AggregateRow>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_untouched_bucket_not_rewritten() {
        let store = store_with(&[raw(600, 10.0, 0.0), raw(4 * H, 5.0, 0.0)]).await;
        let aggregator = BucketAggregator::new(store.clone());
        aggregator.recompute_window(0, 6 * H).await.unwrap();

        // Simulate a manual correction of the second bucket
        sqlx::query("UPDATE station_3h SET temp_c = 99.0 WHERE ts_utc = ?")
            .bind(3 * H)
            .execute(store.pool())
            .await
            .unwrap();

        store.upsert_raw(&[raw(700, 12.0, 0.0)]).await.unwrap();
        aggregator.recompute_buckets([700]).await.unwrap();

        let second = store.aggregate_range(3 * H, 3 * H).await.unwrap();
        assert_eq!(second[0].temperature_c, Some(99.0));
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let store = store_with(&[raw(600, 10.3, 0.2), raw(900, 11.7, 0.1)]).await;
        let aggregator = BucketAggregator::new(store.clone());

        aggregator.recompute_window(0, H).await.unwrap();
        let first = store.aggregate_range(0, H).await.unwrap();
        aggregator.recompute_window(0, H).await.unwrap();

        assert_eq!(store.aggregate_range(0, H).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_repair_window_rebuilds_buckets() {
        let pressure = |ts: Timestamp, hpa: f64| RawObservation {
            pressure_hpa: Some(hpa),
            ..raw(ts, 10.0, 0.0)
        };
        let store = store_with(&[
            pressure(600, 1010.0),
            pressure(1200, 10160.0),
            pressure(4 * H, 1020.0),
        ])
        .await;
        let aggregator = BucketAggregator::new(store.clone());
        aggregator.recompute_window(0, 6 * H).await.unwrap();
        assert_eq!(
            store.aggregate_range(0, 0).await.unwrap()[0].pressure_hpa,
            Some(5585.0)
        );

        let report = aggregator.repair_window(0, 6 * H).await.unwrap();

        assert_eq!(report.rows_repaired, 1);
        assert_eq!(report.aggregation.buckets_written, 2);
        let aggs = store.aggregate_range(0, 6 * H).await.unwrap();
        assert_eq!(aggs[0].pressure_hpa, Some(1013.0));
        assert_eq!(aggs[1].pressure_hpa, Some(1020.0));
    }

    #[tokio::test]
    async fn test_custom_width() {
        let store = store_with(&[raw(600, 10.0, 0.0), raw(4000, 20.0, 0.0)]).await;
        let aggregator = BucketAggregator::with_width(H, store.clone()).unwrap();

        let report = aggregator.recompute_window(0, 2 * H).await.unwrap();
        assert_eq!(report.buckets_written, 2);
        assert_eq!(aggregator.bucket_of(4000).start(), H);

        assert!(BucketAggregator::with_width(0, store).is_err());
    }
}
