//! SQLite schema and row types for the time-series store
//!
//! Every table is keyed by `ts_utc`, Unix seconds as INTEGER, so range
//! queries are plain integer comparisons. Column names follow the layout the
//! dashboard reads; do not rename them without migrating existing databases.

use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::FromRow;
use wx_core::{AggregatedObservation, ForecastRecord, RawObservation};

/// A query with bound SQLite arguments
pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Table names
pub mod tables {
    pub const STATION_RAW: &str = "station_raw";
    pub const STATION_3H: &str = "station_3h";
    pub const FORECAST: &str = "forecast_ow";
    pub const META: &str = "meta";
}

/// Metadata keys
pub mod meta_keys {
    pub const LAST_INGEST: &str = "last_ingest";
    pub const WATERMARK_PREFIX: &str = "watermark.";
}

/// Key column shared by every time-series table
pub const KEY_COLUMN: &str = "ts_utc";

/// Schema statements, applied idempotently on open
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS station_raw (
        ts_utc    INTEGER PRIMARY KEY,
        temp_c    REAL,
        hum       REAL,
        press_hpa REAL,
        wind_kmh  REAL,
        gust_kmh  REAL,
        winddir   REAL,
        rain_mm   REAL,
        wind_ms   REAL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS station_3h (
        ts_utc    INTEGER PRIMARY KEY,
        temp_c    REAL,
        hum       REAL,
        press_hpa REAL,
        wind_kmh  REAL,
        gust_kmh  REAL,
        rain_mm   REAL,
        samples   INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS forecast_ow (
        ts_utc    INTEGER PRIMARY KEY,
        temp_c    REAL,
        hum       REAL,
        press_hpa REAL,
        clouds    REAL,
        wind_ms   REAL,
        winddir   REAL,
        rain_mm   REAL,
        snow_mm   REAL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meta (
        k TEXT PRIMARY KEY,
        v TEXT NOT NULL
    )
    "#,
];

/// A row type stored in one of the time-series tables
///
/// `COLUMNS` lists the key column first, and `bind` must bind values in the
/// same order.
pub trait TableRow: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn key(&self) -> i64;

    fn bind<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;
}

/// `station_raw` record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct RawRow {
    pub ts_utc: i64,
    pub temp_c: Option<f64>,
    pub hum: Option<f64>,
    pub press_hpa: Option<f64>,
    pub wind_kmh: Option<f64>,
    pub gust_kmh: Option<f64>,
    pub winddir: Option<f64>,
    pub rain_mm: Option<f64>,
    pub wind_ms: Option<f64>,
}

impl TableRow for RawRow {
    const TABLE: &'static str = tables::STATION_RAW;
    const COLUMNS: &'static [&'static str] = &[
        "ts_utc", "temp_c", "hum", "press_hpa", "wind_kmh", "gust_kmh", "winddir", "rain_mm",
        "wind_ms",
    ];

    fn key(&self) -> i64 {
        self.ts_utc
    }

    fn bind<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.ts_utc)
            .bind(self.temp_c)
            .bind(self.hum)
            .bind(self.press_hpa)
            .bind(self.wind_kmh)
            .bind(self.gust_kmh)
            .bind(self.winddir)
            .bind(self.rain_mm)
            .bind(self.wind_ms)
    }
}

impl From<&RawObservation> for RawRow {
    fn from(obs: &RawObservation) -> Self {
        Self {
            ts_utc: obs.timestamp,
            temp_c: obs.temperature_c,
            hum: obs.humidity_pct,
            press_hpa: obs.pressure_hpa,
            wind_kmh: obs.wind_speed_kmh,
            gust_kmh: obs.wind_gust_kmh,
            winddir: obs.wind_dir_deg,
            rain_mm: obs.rain_mm,
            wind_ms: obs.wind_speed_ms,
        }
    }
}

impl From<RawRow> for RawObservation {
    fn from(row: RawRow) -> Self {
        Self {
            timestamp: row.ts_utc,
            temperature_c: row.temp_c,
            humidity_pct: row.hum,
            pressure_hpa: row.press_hpa,
            wind_speed_kmh: row.wind_kmh,
            wind_gust_kmh: row.gust_kmh,
            wind_dir_deg: row.winddir,
            rain_mm: row.rain_mm,
            wind_speed_ms: row.wind_ms,
        }
    }
}

/// `station_3h` record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AggregateRow {
    pub ts_utc: i64,
    pub temp_c: Option<f64>,
    pub hum: Option<f64>,
    pub press_hpa: Option<f64>,
    pub wind_kmh: Option<f64>,
    pub gust_kmh: Option<f64>,
    pub rain_mm: Option<f64>,
    pub samples: i64,
}

impl TableRow for AggregateRow {
    const TABLE: &'static str = tables::STATION_3H;
    const COLUMNS: &'static [&'static str] = &[
        "ts_utc", "temp_c", "hum", "press_hpa", "wind_kmh", "gust_kmh", "rain_mm", "samples",
    ];

    fn key(&self) -> i64 {
        self.ts_utc
    }

    fn bind<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.ts_utc)
            .bind(self.temp_c)
            .bind(self.hum)
            .bind(self.press_hpa)
            .bind(self.wind_kmh)
            .bind(self.gust_kmh)
            .bind(self.rain_mm)
            .bind(self.samples)
    }
}

impl From<&AggregatedObservation> for AggregateRow {
    fn from(agg: &AggregatedObservation) -> Self {
        Self {
            ts_utc: agg.bucket_start,
            temp_c: agg.temperature_c,
            hum: agg.humidity_pct,
            press_hpa: agg.pressure_hpa,
            wind_kmh: agg.wind_speed_kmh,
            gust_kmh: agg.wind_gust_kmh,
            rain_mm: agg.rain_mm,
            samples: agg.sample_count,
        }
    }
}

impl From<AggregateRow> for AggregatedObservation {
    fn from(row: AggregateRow) -> Self {
        Self {
            bucket_start: row.ts_utc,
            temperature_c: row.temp_c,
            humidity_pct: row.hum,
            pressure_hpa: row.press_hpa,
            wind_speed_kmh: row.wind_kmh,
            wind_gust_kmh: row.gust_kmh,
            rain_mm: row.rain_mm,
            sample_count: row.samples,
        }
    }
}

/// `forecast_ow` record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ForecastRow {
    pub ts_utc: i64,
    pub temp_c: Option<f64>,
    pub hum: Option<f64>,
    pub press_hpa: Option<f64>,
    pub clouds: Option<f64>,
    pub wind_ms: Option<f64>,
    pub winddir: Option<f64>,
    pub rain_mm: Option<f64>,
    pub snow_mm: Option<f64>,
}

impl TableRow for ForecastRow {
    const TABLE: &'static str = tables::FORECAST;
    const COLUMNS: &'static [&'static str] = &[
        "ts_utc", "temp_c", "hum", "press_hpa", "clouds", "wind_ms", "winddir", "rain_mm",
        "snow_mm",
    ];

    fn key(&self) -> i64 {
        self.ts_utc
    }

    fn bind<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.ts_utc)
            .bind(self.temp_c)
            .bind(self.hum)
            .bind(self.press_hpa)
            .bind(self.clouds)
            .bind(self.wind_ms)
            .bind(self.winddir)
            .bind(self.rain_mm)
            .bind(self.snow_mm)
    }
}

impl From<&ForecastRecord> for ForecastRow {
    fn from(rec: &ForecastRecord) -> Self {
        Self {
            ts_utc: rec.timestamp,
            temp_c: rec.temperature_c,
            hum: rec.humidity_pct,
            press_hpa: rec.pressure_hpa,
            clouds: rec.cloud_cover_pct,
            wind_ms: rec.wind_speed_ms,
            winddir: rec.wind_dir_deg,
            rain_mm: rec.rain_mm,
            snow_mm: rec.snow_mm,
        }
    }
}

impl From<ForecastRow> for ForecastRecord {
    fn from(row: ForecastRow) -> Self {
        Self {
            timestamp: row.ts_utc,
            temperature_c: row.temp_c,
            humidity_pct: row.hum,
            pressure_hpa: row.press_hpa,
            cloud_cover_pct: row.clouds,
            wind_speed_ms: row.wind_ms,
            wind_dir_deg: row.winddir,
            rain_mm: row.rain_mm,
            snow_mm: row.snow_mm,
        }
    }
}

/// Build the batch upsert statement for a row type
///
/// Conflicts on the key overwrite every value column.
pub fn upsert_sql<R: TableRow>() -> String {
    let columns = R::COLUMNS.join(", ");
    let placeholders = vec!["?"; R::COLUMNS.len()].join(", ");
    let updates = R::COLUMNS
        .iter()
        .filter(|c| **c != KEY_COLUMN)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {table} ({columns}) VALUES ({placeholders}) \
         ON CONFLICT({key}) DO UPDATE SET {updates}",
        table = R::TABLE,
        key = KEY_COLUMN,
    )
}

/// Build the inclusive range select for a row type
pub fn range_sql<R: TableRow>() -> String {
    format!(
        "SELECT {columns} FROM {table} WHERE {key} >= ? AND {key} <= ? ORDER BY {key} ASC",
        columns = R::COLUMNS.join(", "),
        table = R::TABLE,
        key = KEY_COLUMN,
    )
}
