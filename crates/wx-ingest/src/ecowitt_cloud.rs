//! Ecowitt cloud history client (`device/history`, API v3)
//!
//! The history endpoint returns one series per metric, each a unit string
//! plus a map of epoch seconds to values. Series are merged per timestamp
//! into raw observations.

use crate::http::{build_client, endpoint, get_json, parse_base_url};
use crate::{ChunkBatch, IngestError, IngestResult, SourceClient, TimeRange};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;
use wx_core::{repair_pressure, to_datetime, RawObservation, Timestamp, Unit};

pub const ECOWITT_API_URL: &str = "https://api.ecowitt.net/api/v3";

/// The provider serves at most one day of history per call
pub const ECOWITT_MAX_SPAN: i64 = 24 * 60 * 60;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ecowitt account keys and the station's MAC address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcowittCredentials {
    pub application_key: String,
    pub api_key: String,
    pub mac: String,
}

/// Sampling resolution of the history series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleType {
    #[default]
    FiveMinutes,
    ThirtyMinutes,
    FourHours,
    Daily,
}

impl CycleType {
    pub fn as_param(&self) -> &'static str {
        match self {
            CycleType::FiveMinutes => "5min",
            CycleType::ThirtyMinutes => "30min",
            CycleType::FourHours => "4hour",
            CycleType::Daily => "1day",
        }
    }

    pub fn minutes(&self) -> f64 {
        match self {
            CycleType::FiveMinutes => 5.0,
            CycleType::ThirtyMinutes => 30.0,
            CycleType::FourHours => 240.0,
            CycleType::Daily => 1440.0,
        }
    }
}

impl std::str::FromStr for CycleType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "5min" | "auto" => Ok(CycleType::FiveMinutes),
            "30min" => Ok(CycleType::ThirtyMinutes),
            "4hour" => Ok(CycleType::FourHours),
            "1day" => Ok(CycleType::Daily),
            other => Err(IngestError::Config(format!("unknown cycle type {other:?}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryData {
    outdoor: OutdoorSeries,
    pressure: PressureSeries,
    wind: WindSeries,
    rainfall: RainSeries,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutdoorSeries {
    temperature: Option<Series>,
    humidity: Option<Series>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PressureSeries {
    relative: Option<Series>,
    absolute: Option<Series>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WindSeries {
    wind_speed: Option<Series>,
    wind_gust: Option<Series>,
    wind_direction: Option<Series>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RainSeries {
    rain_rate: Option<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    list: BTreeMap<String, Value>,
}

/// Numeric value of a series point; `None` for the provider's blanks
fn point_value(value: &Value) -> Option<Result<f64, ()>> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(n.as_f64().ok_or(())),
        Value::String(s) => match s.trim() {
            "" | "-" | "--" => None,
            s => Some(s.parse().map_err(|_| ())),
        },
        _ => Some(Err(())),
    }
}

/// Merges per-metric series into observations keyed by timestamp
#[derive(Default)]
struct SeriesMerger {
    rows: BTreeMap<Timestamp, RawObservation>,
    malformed: usize,
}

impl SeriesMerger {
    fn apply(
        &mut self,
        name: &str,
        series: Option<&Series>,
        default_unit: Unit,
        set: impl Fn(&mut RawObservation, f64),
    ) {
        let Some(series) = series else {
            return;
        };

        let unit = match series.unit.as_deref() {
            None => default_unit,
            Some(text) => match text.parse::<Unit>() {
                Ok(unit) if unit.group() == default_unit.group() => unit,
                _ => {
                    warn!(series = name, unit = text, "Unusable unit, dropping series");
                    self.malformed += series.list.len();
                    return;
                }
            },
        };

        for (key, value) in &series.list {
            let Ok(ts) = key.trim().parse::<Timestamp>() else {
                warn!(series = name, key = %key, "Malformed timestamp key");
                self.malformed += 1;
                continue;
            };
            match point_value(value) {
                None => {}
                Some(Ok(v)) => {
                    let obs = self
                        .rows
                        .entry(ts)
                        .or_insert_with(|| RawObservation::new(ts));
                    set(obs, unit.to_metric(v));
                }
                Some(Err(())) => {
                    warn!(series = name, timestamp = ts, value = %value, "Malformed value");
                    self.malformed += 1;
                }
            }
        }
    }

    fn finish(self) -> ChunkBatch<RawObservation> {
        let records = self
            .rows
            .into_values()
            .map(RawObservation::with_derived)
            .collect();
        ChunkBatch::new(records, self.malformed)
    }
}

fn parse_history(
    response: HistoryResponse,
    cycle: CycleType,
) -> IngestResult<ChunkBatch<RawObservation>> {
    if response.code != 0 {
        return Err(IngestError::SourceUnavailable(format!(
            "ecowitt code {}: {}",
            response.code, response.msg
        )));
    }

    // No data for the window comes back as an empty list instead of an object
    let data: HistoryData = match response.data {
        Value::Object(_) => serde_json::from_value(response.data)
            .map_err(|e| IngestError::MalformedResponse(format!("history data: {e}")))?,
        _ => return Ok(ChunkBatch::empty()),
    };

    let mut merger = SeriesMerger::default();
    merger.apply(
        "temperature",
        data.outdoor.temperature.as_ref(),
        Unit::Celsius,
        |o, v| o.temperature_c = Some(v),
    );
    merger.apply(
        "humidity",
        data.outdoor.humidity.as_ref(),
        Unit::Percent,
        |o, v| o.humidity_pct = Some(v),
    );
    merger.apply(
        "pressure",
        data.pressure.relative.as_ref().or(data.pressure.absolute.as_ref()),
        Unit::Hectopascal,
        |o, v| o.pressure_hpa = repair_pressure(v),
    );
    merger.apply(
        "wind_speed",
        data.wind.wind_speed.as_ref(),
        Unit::KilometersPerHour,
        |o, v| o.wind_speed_kmh = Some(v),
    );
    merger.apply(
        "wind_gust",
        data.wind.wind_gust.as_ref(),
        Unit::KilometersPerHour,
        |o, v| o.wind_gust_kmh = Some(v),
    );
    merger.apply(
        "wind_direction",
        data.wind.wind_direction.as_ref(),
        Unit::Degree,
        |o, v| o.wind_dir_deg = Some(v),
    );
    // rate over one sampling cycle gives the rain of that reading
    let cycle_minutes = cycle.minutes();
    merger.apply(
        "rain_rate",
        data.rainfall.rain_rate.as_ref(),
        Unit::MillimeterPerHour,
        move |o, v| o.rain_mm = Some(v * cycle_minutes / 60.0),
    );

    Ok(merger.finish())
}

/// Ecowitt cloud history client
pub struct EcowittCloudClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: EcowittCredentials,
    cycle: CycleType,
}

impl EcowittCloudClient {
    pub fn new(
        base_url: &str,
        credentials: EcowittCredentials,
        timeout: Duration,
    ) -> IngestResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            credentials,
            cycle: CycleType::default(),
        })
    }

    pub fn with_cycle(mut self, cycle: CycleType) -> Self {
        self.cycle = cycle;
        self
    }

    fn history_url(&self, range: TimeRange) -> IngestResult<Url> {
        let stamp = |ts: Timestamp| {
            to_datetime(ts)
                .map(|dt| dt.format(DATE_FORMAT).to_string())
                .ok_or(IngestError::InvalidRange {
                    since: range.since,
                    until: range.until,
                })
        };

        let mut url = endpoint(&self.base_url, "device/history")?;
        url.query_pairs_mut()
            .append_pair("application_key", &self.credentials.application_key)
            .append_pair("api_key", &self.credentials.api_key)
            .append_pair("mac", &self.credentials.mac)
            .append_pair("start_date", &stamp(range.since)?)
            .append_pair("end_date", &stamp(range.until)?)
            .append_pair("cycle_type", self.cycle.as_param())
            .append_pair("call_back", "outdoor,pressure,wind,rainfall")
            .append_pair("temp_unitid", "1")
            .append_pair("pressure_unitid", "3")
            .append_pair("wind_speed_unitid", "7")
            .append_pair("rainfall_unitid", "12");
        Ok(url)
    }
}

#[async_trait::async_trait]
impl SourceClient for EcowittCloudClient {
    type Record = RawObservation;

    fn name(&self) -> &str {
        "ecowitt-cloud"
    }

    fn max_span(&self) -> i64 {
        ECOWITT_MAX_SPAN
    }

    #[instrument(skip(self), fields(source = "ecowitt-cloud"))]
    async fn fetch_chunk(&self, range: TimeRange) -> IngestResult<ChunkBatch<RawObservation>> {
        let url = self.history_url(range)?;
        let response: HistoryResponse = get_json(&self.http, url).await?;
        let batch = parse_history(response, self.cycle)?;

        debug!(
            records = batch.records.len(),
            malformed = batch.malformed,
            "Parsed Ecowitt history"
        );
        Ok(batch)
    }
}
