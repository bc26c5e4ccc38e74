//! Ecowitt gateway live data over the LAN (`get_livedata_info`)
//!
//! The gateway only knows the current reading. It is stamped with the fetch
//! time floored to the minute and returned when that instant lies in the
//! requested range. A reading taken less than a minute after the range ends
//! is pulled back to the range's last minute.

use crate::http::{build_client, endpoint, get_json, parse_base_url};
use crate::{ChunkBatch, IngestResult, SourceClient, TimeRange};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;
use wx_core::{parse_measurement, repair_pressure, split_measurement, RawObservation, Timestamp, Unit};

/// Sensor ids in `common_list`
mod sensor {
    pub const OUTDOOR_TEMP: &str = "0x02";
    pub const OUTDOOR_HUMIDITY: &str = "0x07";
    pub const WIND_DIRECTION: &str = "0x0A";
    pub const WIND_SPEED: &str = "0x0B";
    pub const WIND_GUST: &str = "0x0C";
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LiveData {
    common_list: Vec<CommonEntry>,
    wh25: Vec<IndoorEntry>,
}

#[derive(Debug, Deserialize)]
struct CommonEntry {
    id: String,
    val: String,
    #[serde(default)]
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndoorEntry {
    #[serde(default)]
    rel: Option<String>,
    #[serde(default)]
    abs: Option<String>,
}

/// Clock used to stamp live readings
pub type Clock = fn() -> Timestamp;

fn wall_clock() -> Timestamp {
    Utc::now().timestamp()
}

/// Parse a gateway value like `"5.4 km/h"`, falling back to the entry's unit
fn gateway_value(val: &str, unit: Option<&str>, default: Unit) -> Option<f64> {
    let parsed = match split_measurement(val) {
        Ok((value, None)) => match unit.map(str::parse::<Unit>) {
            Some(Ok(unit)) => unit.to_metric_checked(value, default.group()),
            _ => parse_measurement(val, default),
        },
        _ => parse_measurement(val, default),
    };
    match parsed {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(value = val, error = %err, "Unreadable gateway value");
            None
        }
    }
}

fn parse_live(data: LiveData, timestamp: Timestamp) -> ChunkBatch<RawObservation> {
    let mut obs = RawObservation::new(timestamp);
    let mut malformed = 0;

    for entry in &data.common_list {
        let default = match entry.id.as_str() {
            sensor::OUTDOOR_TEMP => Unit::Celsius,
            sensor::OUTDOOR_HUMIDITY => Unit::Percent,
            sensor::WIND_DIRECTION => Unit::Degree,
            sensor::WIND_SPEED | sensor::WIND_GUST => Unit::KilometersPerHour,
            _ => continue,
        };
        let Some(value) = gateway_value(&entry.val, entry.unit.as_deref(), default) else {
            malformed += 1;
            continue;
        };
        match entry.id.as_str() {
            sensor::OUTDOOR_TEMP => obs.temperature_c = Some(value),
            sensor::OUTDOOR_HUMIDITY => obs.humidity_pct = Some(value),
            sensor::WIND_DIRECTION => obs.wind_dir_deg = Some(value),
            sensor::WIND_SPEED => obs.wind_speed_kmh = Some(value),
            _ => obs.wind_gust_kmh = Some(value),
        }
    }

    if let Some(indoor) = data.wh25.first() {
        if let Some(text) = indoor.rel.as_deref().or(indoor.abs.as_deref()) {
            match gateway_value(text, None, Unit::Hectopascal) {
                Some(value) => obs.pressure_hpa = repair_pressure(value),
                None => malformed += 1,
            }
        }
    }

    if obs.is_empty() {
        return ChunkBatch::new(Vec::new(), malformed);
    }
    ChunkBatch::new(vec![obs.with_derived()], malformed)
}

/// Minute stamp for a reading taken at `now`, if it belongs to `range`
fn live_stamp(now: Timestamp, range: TimeRange) -> Option<Timestamp> {
    let stamped = now - now.rem_euclid(60);
    if range.contains(stamped) {
        return Some(stamped);
    }
    if stamped > range.until && stamped - range.until < 60 {
        let last_minute = range.until - range.until.rem_euclid(60);
        return Some(if range.contains(last_minute) { last_minute } else { range.until });
    }
    None
}

/// Ecowitt gateway live-data client
pub struct EcowittLanClient {
    http: reqwest::Client,
    base_url: Url,
    clock: Clock,
}

impl EcowittLanClient {
    /// `base_url` is the gateway address, e.g. `http://192.168.1.31`
    pub fn new(base_url: &str, timeout: Duration) -> IngestResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            clock: wall_clock,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait::async_trait]
impl SourceClient for EcowittLanClient {
    type Record = RawObservation;

    fn name(&self) -> &str {
        "ecowitt-lan"
    }

    fn max_span(&self) -> i64 {
        i64::MAX
    }

    #[instrument(skip(self), fields(source = "ecowitt-lan"))]
    async fn fetch_chunk(&self, range: TimeRange) -> IngestResult<ChunkBatch<RawObservation>> {
        let now = (self.clock)();
        let Some(stamped) = live_stamp(now, range) else {
            debug!(now, "Live reading falls outside the requested range");
            return Ok(ChunkBatch::empty());
        };

        let url = endpoint(&self.base_url, "get_livedata_info")?;
        let data: LiveData = get_json(&self.http, url).await?;
        Ok(parse_live(data, stamped))
    }
}
