//! Store operations: batch upserts, range queries and watermark metadata

use crate::schema::{
    meta_keys, range_sql, tables, upsert_sql, AggregateRow, ForecastRow, RawRow, TableRow,
};
use crate::{DbError, DbResult, TimeSeriesStore};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, instrument};
use wx_core::{AggregatedObservation, ForecastRecord, RawObservation, SourceId, Timestamp, Watermark};

fn watermark_key(source: SourceId) -> String {
    format!("{}{}", meta_keys::WATERMARK_PREFIX, source.as_str())
}

async fn put_meta(tx: &mut Transaction<'_, Sqlite>, key: &str, value: &str) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO meta (k, v) VALUES (?, ?)
        ON CONFLICT(k) DO UPDATE SET v = excluded.v
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl TimeSeriesStore {
    /// Insert or overwrite a batch of rows in one transaction
    ///
    /// Either every row of the batch is committed or none is.
    #[instrument(skip(self, rows), fields(table = R::TABLE, rows = rows.len()))]
    pub async fn upsert_rows<R: TableRow>(&self, rows: &[R]) -> DbResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = upsert_sql::<R>();
        let mut tx = self.pool().begin().await?;
        for row in rows {
            row.bind(sqlx::query(&sql)).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!("Upserted {} rows into {}", rows.len(), R::TABLE);
        Ok(rows.len() as u64)
    }

    /// Rows with `since <= ts_utc <= until`, ascending by timestamp
    #[instrument(skip(self), fields(table = R::TABLE))]
    pub async fn range_query<R: TableRow>(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> DbResult<Vec<R>> {
        let sql = range_sql::<R>();
        let rows = sqlx::query_as::<_, R>(&sql)
            .bind(since)
            .bind(until)
            .fetch_all(self.pool())
            .await?;

        debug!(
            "Retrieved {} rows from {} between {} and {}",
            rows.len(),
            R::TABLE,
            since,
            until
        );
        Ok(rows)
    }

    /// Number of rows in a table
    pub async fn count<R: TableRow>(&self) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", R::TABLE);
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Upsert raw station readings, last fetch wins per timestamp
    pub async fn upsert_raw(&self, records: &[RawObservation]) -> DbResult<u64> {
        let rows: Vec<RawRow> = records.iter().map(RawRow::from).collect();
        self.upsert_rows(&rows).await
    }

    /// Upsert bucket aggregates
    pub async fn upsert_aggregates(&self, records: &[AggregatedObservation]) -> DbResult<u64> {
        let rows: Vec<AggregateRow> = records.iter().map(AggregateRow::from).collect();
        self.upsert_rows(&rows).await
    }

    /// Replace forecast rows at every timestamp in the batch
    ///
    /// Rows at timestamps absent from the batch are left alone.
    pub async fn replace_forecast(&self, records: &[ForecastRecord]) -> DbResult<u64> {
        let rows: Vec<ForecastRow> = records.iter().map(ForecastRow::from).collect();
        self.upsert_rows(&rows).await
    }

    pub async fn raw_range(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> DbResult<Vec<RawObservation>> {
        let rows = self.range_query::<RawRow>(since, until).await?;
        Ok(rows.into_iter().map(RawObservation::from).collect())
    }

    pub async fn aggregate_range(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> DbResult<Vec<AggregatedObservation>> {
        let rows = self.range_query::<AggregateRow>(since, until).await?;
        Ok(rows.into_iter().map(AggregatedObservation::from).collect())
    }

    pub async fn forecast_range(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> DbResult<Vec<ForecastRecord>> {
        let rows = self.range_query::<ForecastRow>(since, until).await?;
        Ok(rows.into_iter().map(ForecastRecord::from).collect())
    }

    /// Get metadata value by key
    #[instrument(skip(self))]
    pub async fn get_meta(&self, key: &str) -> DbResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT v FROM meta WHERE k = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(value)
    }

    /// Set metadata value
    #[instrument(skip(self))]
    pub async fn set_meta(&self, key: &str, value: &str) -> DbResult<()> {
        let mut tx = self.pool().begin().await?;
        put_meta(&mut tx, key, value).await?;
        tx.commit().await?;

        debug!("Set metadata: {} = {}", key, value);
        Ok(())
    }

    /// Last durably ingested timestamp of a source, if any
    pub async fn get_watermark(&self, source: SourceId) -> DbResult<Option<Timestamp>> {
        let key = watermark_key(source);
        match self.get_meta(&key).await? {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse::<Timestamp>()
                .map(Some)
                .map_err(|_| DbError::InvalidMetadata { key, value }),
        }
    }

    pub async fn set_watermark(&self, watermark: Watermark) -> DbResult<()> {
        self.set_meta(
            &watermark_key(watermark.source),
            &watermark.fetched_until.to_string(),
        )
        .await
    }

    /// Advance the given watermarks and stamp `last_ingest` in one transaction
    #[instrument(skip(self))]
    pub async fn commit_watermarks(
        &self,
        watermarks: &[Watermark],
        committed_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut tx = self.pool().begin().await?;
        for watermark in watermarks {
            put_meta(
                &mut tx,
                &watermark_key(watermark.source),
                &watermark.fetched_until.to_string(),
            )
            .await?;
        }
        put_meta(
            &mut tx,
            meta_keys::LAST_INGEST,
            &committed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .await?;
        tx.commit().await?;

        debug!("Committed {} watermarks", watermarks.len());
        Ok(())
    }

    /// Time of the last committed cycle
    pub async fn last_ingest(&self) -> DbResult<Option<DateTime<Utc>>> {
        match self.get_meta(meta_keys::LAST_INGEST).await? {
            None => Ok(None),
            Some(value) => DateTime::parse_from_rfc3339(&value)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|_| DbError::InvalidMetadata {
                    key: meta_keys::LAST_INGEST.to_string(),
                    value,
                }),
        }
    }

    /// Raw timestamps stored within `[since, until]`
    pub async fn raw_timestamps(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> DbResult<Vec<Timestamp>> {
        let sql = format!(
            "SELECT ts_utc FROM {} WHERE ts_utc >= ? AND ts_utc <= ? ORDER BY ts_utc ASC",
            tables::STATION_RAW
        );
        let timestamps = sqlx::query_scalar::<_, i64>(&sql)
            .bind(since)
            .bind(until)
            .fetch_all(self.pool())
            .await?;
        Ok(timestamps)
    }

    /// Re-apply the pressure plausibility repair to stored raw rows
    ///
    /// Rows whose pressure changes are rewritten in one transaction; an
    /// implausible value becomes NULL. Returns the rewritten timestamps.
    #[instrument(skip(self))]
    pub async fn repair_pressure(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> DbResult<Vec<Timestamp>> {
        let mut rows = self.range_query::<RawRow>(since, until).await?;
        rows.retain_mut(|row| match row.press_hpa {
            Some(value) => {
                let fixed = wx_core::repair_pressure(value);
                row.press_hpa = fixed;
                fixed != Some(value)
            }
            None => false,
        });

        self.upsert_rows(&rows).await?;
        debug!("Repaired pressure on {} raw rows", rows.len());
        Ok(rows.iter().map(|row| row.ts_utc).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(ts: Timestamp, temp: f64) -> RawObservation {
        RawObservation {
            temperature_c: Some(temp),
            ..RawObservation::new(ts)
        }
    }

    fn forecast(ts: Timestamp, temp: f64) -> ForecastRecord {
        ForecastRecord {
            temperature_c: Some(temp),
            ..ForecastRecord::new(ts)
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_key() {
        let store = TimeSeriesStore::open_memory().await.unwrap();

        store.upsert_raw(&[raw(100, 10.0), raw(200, 11.0)]).await.unwrap();
        store.upsert_raw(&[raw(200, 12.0)]).await.unwrap();

        assert_eq!(store.count::<RawRow>().await.unwrap(), 2);
        let rows = store.raw_range(0, 1000).await.unwrap();
        assert_eq!(rows[1].temperature_c, Some(12.0));
    }

    #[tokio::test]
    async fn test_overwrite_clears_missing_values() {
        let store = TimeSeriesStore::open_memory().await.unwrap();

        let mut first = raw(100, 10.0);
        first.humidity_pct = Some(80.0);
        store.upsert_raw(&[first]).await.unwrap();
        store.upsert_raw(&[raw(100, 10.5)]).await.unwrap();

        let rows = store.raw_range(100, 100).await.unwrap();
        assert_eq!(rows[0].humidity_pct, None);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        sqlx::query(
            r#"
            CREATE TRIGGER reject_300 BEFORE INSERT ON station_raw
            WHEN NEW.ts_utc = 300
            BEGIN SELECT RAISE(ABORT, 'rejected'); END
            "#,
        )
        .execute(store.pool())
        .await
        .unwrap();

        let result = store
            .upsert_raw(&[raw(100, 1.0), raw(200, 2.0), raw(300, 3.0)])
            .await;

        assert!(matches!(result, Err(DbError::StorageUnavailable(_))));
        assert_eq!(store.count::<RawRow>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_range_query_inclusive_and_ordered() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        store
            .upsert_raw(&[raw(300, 3.0), raw(100, 1.0), raw(200, 2.0), raw(400, 4.0)])
            .await
            .unwrap();

        let rows = store.range_query::<RawRow>(100, 300).await.unwrap();
        let keys: Vec<i64> = rows.iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec![100, 200, 300]);

        assert_eq!(store.raw_timestamps(150, 400).await.unwrap(), vec![200, 300, 400]);
    }

    #[tokio::test]
    async fn test_repair_pressure_rewrites_stored_rows() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        let with_pressure = |ts: Timestamp, press: Option<f64>| RawObservation {
            pressure_hpa: press,
            ..raw(ts, 10.0)
        };
        store
            .upsert_raw(&[
                with_pressure(100, Some(1013.0)),
                with_pressure(200, Some(10132.0)),
                with_pressure(300, Some(101.5)),
                with_pressure(400, Some(5000.0)),
                with_pressure(500, None),
                with_pressure(600, Some(99000.0)),
            ])
            .await
            .unwrap();

        let repaired = store.repair_pressure(0, 500).await.unwrap();
        assert_eq!(repaired, vec![200, 300, 400]);

        let pressures: Vec<Option<f64>> = store
            .raw_range(0, 1000)
            .await
            .unwrap()
            .iter()
            .map(|r| r.pressure_hpa)
            .collect();
        assert_eq!(
            pressures,
            vec![Some(1013.0), Some(1013.2), Some(1015.0), None, None, Some(99000.0)]
        );

        assert!(store.repair_pressure(0, 500).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_forecast_keeps_other_timestamps() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        store
            .replace_forecast(&[forecast(10_800, 5.0), forecast(21_600, 6.0), forecast(32_400, 7.0)])
            .await
            .unwrap();

        store
            .replace_forecast(&[forecast(10_800, 15.0), forecast(21_600, 16.0)])
            .await
            .unwrap();

        let rows = store.forecast_range(0, 100_000).await.unwrap();
        let temps: Vec<Option<f64>> = rows.iter().map(|r| r.temperature_c).collect();
        assert_eq!(temps, vec![Some(15.0), Some(16.0), Some(7.0)]);
    }

    #[tokio::test]
    async fn test_aggregate_roundtrip() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        let agg = AggregatedObservation {
            bucket_start: 10_800,
            temperature_c: Some(20.0),
            humidity_pct: None,
            pressure_hpa: Some(1012.5),
            wind_speed_kmh: None,
            wind_gust_kmh: None,
            rain_mm: Some(3.0),
            sample_count: 3,
        };

        store.upsert_aggregates(&[agg.clone()]).await.unwrap();
        assert_eq!(store.aggregate_range(0, 20_000).await.unwrap(), vec![agg]);
    }

    #[tokio::test]
    async fn test_watermarks() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        assert_eq!(store.get_watermark(SourceId::Station).await.unwrap(), None);

        store
            .set_watermark(Watermark::new(SourceId::Station, 1_000))
            .await
            .unwrap();
        assert_eq!(store.get_watermark(SourceId::Station).await.unwrap(), Some(1_000));
        assert_eq!(store.get_watermark(SourceId::Forecast).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_watermarks_stamps_last_ingest() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        store
            .commit_watermarks(
                &[
                    Watermark::new(SourceId::Station, 2_000),
                    Watermark::new(SourceId::Forecast, 3_000),
                ],
                at,
            )
            .await
            .unwrap();

        assert_eq!(store.get_watermark(SourceId::Station).await.unwrap(), Some(2_000));
        assert_eq!(store.get_watermark(SourceId::Forecast).await.unwrap(), Some(3_000));
        assert_eq!(store.last_ingest().await.unwrap(), Some(at));
        insta::assert_snapshot!(
            store.get_meta("last_ingest").await.unwrap().unwrap(),
            @"2024-05-01T12:00:00Z"
        );
    }

    #[tokio::test]
    async fn test_invalid_watermark() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        store.set_meta("watermark.station", "yesterday").await.unwrap();

        let err = store.get_watermark(SourceId::Station).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidMetadata { .. }));
    }

    #[tokio::test]
    async fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.db");

        let store = TimeSeriesStore::open(&path).await.unwrap();
        store.upsert_raw(&[raw(100, 1.0)]).await.unwrap();
        store.close().await;

        let reopened = TimeSeriesStore::open(&path).await.unwrap();
        assert_eq!(reopened.count::<RawRow>().await.unwrap(), 1);
    }
}
