//! OpenWeather 5 day / 3 hour forecast client
//!
//! The provider returns its whole current snapshot regardless of the range
//! asked for; items are normalized one by one and filtered to the range.

use crate::http::{build_client, endpoint, get_json, parse_base_url};
use crate::{ChunkBatch, IngestResult, SourceClient, TimeRange};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;
use wx_core::{ForecastRecord, Timestamp};

pub const OPENWEATHER_API_URL: &str = "https://api.openweathermap.org/data/2.5";

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ForecastItem {
    dt: Timestamp,
    #[serde(default)]
    main: MainBlock,
    #[serde(default)]
    wind: WindBlock,
    #[serde(default)]
    clouds: CloudBlock,
    #[serde(default)]
    rain: PeriodBlock,
    #[serde(default)]
    snow: PeriodBlock,
}

#[derive(Debug, Default, Deserialize)]
struct MainBlock {
    temp: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WindBlock {
    speed: Option<f64>,
    deg: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudBlock {
    all: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PeriodBlock {
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

impl From<ForecastItem> for ForecastRecord {
    fn from(item: ForecastItem) -> Self {
        Self {
            timestamp: item.dt,
            temperature_c: item.main.temp,
            humidity_pct: item.main.humidity,
            pressure_hpa: item.main.pressure,
            cloud_cover_pct: item.clouds.all,
            wind_speed_ms: item.wind.speed,
            wind_dir_deg: item.wind.deg,
            rain_mm: item.rain.three_hours,
            snow_mm: item.snow.three_hours,
        }
    }
}

/// Normalize each item independently; broken items are counted and dropped
fn parse_forecast(response: ForecastResponse, range: TimeRange) -> ChunkBatch<ForecastRecord> {
    let mut records = Vec::with_capacity(response.list.len());
    let mut malformed = 0;

    for (idx, value) in response.list.into_iter().enumerate() {
        match serde_json::from_value::<ForecastItem>(value) {
            Ok(item) if range.contains(item.dt) => records.push(ForecastRecord::from(item)),
            Ok(_) => {}
            Err(err) => {
                warn!(item = idx, error = %err, "Dropping malformed forecast item");
                malformed += 1;
            }
        }
    }

    ChunkBatch::new(records, malformed)
}

/// Forecast location and credentials
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastLocation {
    pub api_key: String,
    pub lat: f64,
    pub lon: f64,
}

/// OpenWeather forecast client
pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: Url,
    location: ForecastLocation,
}

impl OpenWeatherClient {
    pub fn new(base_url: &str, location: ForecastLocation, timeout: Duration) -> IngestResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            location,
        })
    }

    fn forecast_url(&self) -> IngestResult<Url> {
        let mut url = endpoint(&self.base_url, "forecast")?;
        url.query_pairs_mut()
            .append_pair("lat", &self.location.lat.to_string())
            .append_pair("lon", &self.location.lon.to_string())
            .append_pair("appid", &self.location.api_key)
            .append_pair("units", "metric");
        Ok(url)
    }
}

#[async_trait::async_trait]
impl SourceClient for OpenWeatherClient {
    type Record = ForecastRecord;

    fn name(&self) -> &str {
        "openweather"
    }

    fn max_span(&self) -> i64 {
        i64::MAX
    }

    #[instrument(skip(self), fields(source = "openweather"))]
    async fn fetch_chunk(&self, range: TimeRange) -> IngestResult<ChunkBatch<ForecastRecord>> {
        let response: ForecastResponse = get_json(&self.http, self.forecast_url()?).await?;
        let total = response.list.len();
        let batch = parse_forecast(response, range);

        debug!(
            total,
            kept = batch.records.len(),
            malformed = batch.malformed,
            "Parsed forecast snapshot"
        );
        Ok(batch)
    }
}
