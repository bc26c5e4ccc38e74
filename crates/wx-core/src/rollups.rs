//! Aggregation and rollup calculations for 3-hour buckets

use crate::types::{AggregatedObservation, RawObservation, Timestamp};

/// How the values of one column are folded into a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateType {
    Avg,
    Sum,
}

/// Accumulator for calculating aggregates over multiple observations
#[derive(Debug, Clone)]
pub struct Accumulator {
    observations: Vec<f64>,
    aggregate_type: AggregateType,
}

impl Accumulator {
    pub fn new(aggregate_type: AggregateType) -> Self {
        Self {
            observations: Vec::new(),
            aggregate_type,
        }
    }

    /// Add a value; missing and non-finite values are ignored
    pub fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.observations.push(v);
        }
    }

    pub fn result(&self) -> Option<f64> {
        if self.observations.is_empty() {
            return None;
        }

        let sum: f64 = self.observations.iter().sum();
        Some(match self.aggregate_type {
            AggregateType::Sum => sum,
            AggregateType::Avg => sum / self.observations.len() as f64,
        })
    }

    pub fn count(&self) -> usize {
        self.observations.len()
    }
}

/// Aggregate type used for each bucket column
pub fn default_aggregate_type(column: &str) -> AggregateType {
    match column {
        "rain_mm" => AggregateType::Sum,
        _ => AggregateType::Avg,
    }
}

/// Fold the raw rows of one bucket into its aggregate
///
/// Rows are folded in timestamp order whatever order they arrive in, so the
/// result only depends on the set of rows. Returns `None` for an empty bucket.
pub fn aggregate_bucket(
    bucket_start: Timestamp,
    rows: &[RawObservation],
) -> Option<AggregatedObservation> {
    if rows.is_empty() {
        return None;
    }

    let mut ordered: Vec<&RawObservation> = rows.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut temperature = Accumulator::new(default_aggregate_type("temp_c"));
    let mut humidity = Accumulator::new(default_aggregate_type("hum"));
    let mut pressure = Accumulator::new(default_aggregate_type("press_hpa"));
    let mut wind = Accumulator::new(default_aggregate_type("wind_kmh"));
    let mut gust = Accumulator::new(default_aggregate_type("gust_kmh"));
    let mut rain = Accumulator::new(default_aggregate_type("rain_mm"));

    for row in &ordered {
        temperature.add(row.temperature_c);
        humidity.add(row.humidity_pct);
        pressure.add(row.pressure_hpa);
        wind.add(row.wind_speed_kmh);
        gust.add(row.wind_gust_kmh);
        rain.add(row.rain_mm);
    }

    Some(AggregatedObservation {
        bucket_start,
        temperature_c: temperature.result(),
        humidity_pct: humidity.result(),
        pressure_hpa: pressure.result(),
        wind_speed_kmh: wind.result(),
        wind_gust_kmh: gust.result(),
        rain_mm: rain.result(),
        sample_count: ordered.len() as i64,
    })
}
