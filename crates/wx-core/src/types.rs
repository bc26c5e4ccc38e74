//! Core data types for station observations and forecasts

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type (Unix epoch seconds, UTC)
pub type Timestamp = i64;

/// Convert a timestamp to a UTC datetime, if representable
pub fn to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

/// Render a timestamp as RFC 3339 for logs and metadata
pub fn format_timestamp(ts: Timestamp) -> String {
    to_datetime(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Anything keyed by a single observation timestamp
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

/// Identifies one of the two external sources of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Station,
    Forecast,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Station => "station",
            SourceId::Forecast => "forecast",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized station reading (metric units)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawObservation {
    /// Observation time, unique key
    pub timestamp: Timestamp,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_gust_kmh: Option<f64>,
    pub wind_dir_deg: Option<f64>,
    pub rain_mm: Option<f64>,
    /// Derived from `wind_speed_kmh`, see [`RawObservation::with_derived`]
    pub wind_speed_ms: Option<f64>,
}

impl RawObservation {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Fill in derived columns from the measured ones
    pub fn with_derived(mut self) -> Self {
        self.wind_speed_ms = self.wind_speed_kmh.map(crate::units::kmh_to_ms);
        self
    }

    /// True when no value column carries data
    pub fn is_empty(&self) -> bool {
        self.temperature_c.is_none()
            && self.humidity_pct.is_none()
            && self.pressure_hpa.is_none()
            && self.wind_speed_kmh.is_none()
            && self.wind_gust_kmh.is_none()
            && self.wind_dir_deg.is_none()
            && self.rain_mm.is_none()
    }
}

impl Timestamped for RawObservation {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Downsampled station data for one 3-hour bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedObservation {
    /// Bucket start, aligned to a 3-hour boundary
    pub bucket_start: Timestamp,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_gust_kmh: Option<f64>,
    /// Total rainfall over the bucket
    pub rain_mm: Option<f64>,
    /// Number of raw rows folded into this bucket
    pub sample_count: i64,
}

impl Timestamped for AggregatedObservation {
    fn timestamp(&self) -> Timestamp {
        self.bucket_start
    }
}

/// Latest known prediction for one future time step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ForecastRecord {
    pub timestamp: Timestamp,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub wind_dir_deg: Option<f64>,
    pub rain_mm: Option<f64>,
    pub snow_mm: Option<f64>,
}

impl ForecastRecord {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }
}

impl Timestamped for ForecastRecord {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Point up to which a source has been durably ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub source: SourceId,
    pub fetched_until: Timestamp,
}

impl Watermark {
    pub fn new(source: SourceId, fetched_until: Timestamp) -> Self {
        Self {
            source,
            fetched_until,
        }
    }
}
