//! Station archive exports: CSV or JSON lines
//!
//! The feed path is one file, a directory of `*.csv` / `*.jsonl` files, or a
//! glob pattern. Column names vary between export tools, so each canonical
//! field accepts the known aliases (case-insensitive) plus an optional
//! configured name. Timestamps may be epoch seconds, RFC 3339, or a naive
//! `YYYY-MM-DD HH:MM:SS` read in the station's timezone.
//!
//! Unreadable values are dropped and counted as malformed; rows left with
//! no readable value are skipped.

use crate::{ChunkBatch, IngestError, IngestResult, SourceClient, TimeRange};
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use wx_core::{parse_measurement, repair_pressure, RawObservation, Timestamp, Unit};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"];

/// Canonical fields of an archive row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArchiveField {
    Time,
    Temperature,
    Humidity,
    Pressure,
    Wind,
    Gust,
    WindDir,
    Rain,
}

impl ArchiveField {
    pub const ALL: [ArchiveField; 8] = [
        ArchiveField::Time,
        ArchiveField::Temperature,
        ArchiveField::Humidity,
        ArchiveField::Pressure,
        ArchiveField::Wind,
        ArchiveField::Gust,
        ArchiveField::WindDir,
        ArchiveField::Rain,
    ];

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            ArchiveField::Time => &["Time", "ts_utc", "dateTime", "timestamp", "datetime", "date_time"],
            ArchiveField::Temperature => &["Temp_C", "outTemp", "temp", "temperature"],
            ArchiveField::Humidity => &["Humidity", "hum", "outHumidity"],
            ArchiveField::Pressure => &["Pressure_hPa", "press_hpa", "barometer", "pressure"],
            ArchiveField::Wind => &[
                "Wind_kmh", "windSpeed", "WindSpeed_kmh", "wind_speed", "wind", "wind_avg",
                "avg_wind",
            ],
            ArchiveField::Gust => &["WindGust_kmh", "gust_kmh", "windGust", "Gust", "wind_gust"],
            ArchiveField::WindDir => &["WindDir", "winddir", "wind_dir"],
            ArchiveField::Rain => &["Rain_mm", "rain"],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ArchiveField::Time => "time",
            ArchiveField::Temperature => "temperature",
            ArchiveField::Humidity => "humidity",
            ArchiveField::Pressure => "pressure",
            ArchiveField::Wind => "wind",
            ArchiveField::Gust => "gust",
            ArchiveField::WindDir => "wind_dir",
            ArchiveField::Rain => "rain",
        }
    }
}

/// Column names looked up for each field, configured names first
#[derive(Debug, Clone, Default)]
pub struct ArchiveColumns {
    configured: BTreeMap<ArchiveField, String>,
}

impl ArchiveColumns {
    pub fn with_column(mut self, field: ArchiveField, name: impl Into<String>) -> Self {
        self.configured.insert(field, name.into());
        self
    }

    /// First of `keys` naming `field`
    fn resolve<'k>(&self, field: ArchiveField, keys: &[&'k str]) -> Option<&'k str> {
        self.configured
            .get(&field)
            .map(String::as_str)
            .into_iter()
            .chain(field.aliases().iter().copied())
            .find_map(|candidate| {
                keys.iter()
                    .copied()
                    .find(|key| key.trim().eq_ignore_ascii_case(candidate))
            })
    }
}

/// How archive rows are read
#[derive(Debug, Clone)]
pub struct ArchiveFormat {
    /// Unit of wind values without a suffix
    pub wind_unit: Unit,
    /// Zone of naive timestamps
    pub timezone: Tz,
    pub columns: ArchiveColumns,
}

impl Default for ArchiveFormat {
    fn default() -> Self {
        Self {
            wind_unit: Unit::KilometersPerHour,
            timezone: Tz::UTC,
            columns: ArchiveColumns::default(),
        }
    }
}

type Cells = BTreeMap<ArchiveField, Value>;

/// Parse a timestamp cell; naive date-times are read in `tz`
pub fn parse_timestamp(value: &Value, tz: Tz) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(epoch) = s.parse::<i64>() {
                return Some(epoch);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
            if let Some(dt) = OFFSET_FORMATS
                .iter()
                .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
            {
                return Some(dt.timestamp());
            }
            // a local time skipped by a DST change has no instant
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .and_then(|naive| tz.from_local_datetime(&naive).earliest())
                .map(|dt| dt.timestamp())
        }
        _ => None,
    }
}

/// Parse a value cell; numbers are taken in `default`'s unit
fn cell(value: Option<&Value>, default: Unit) -> Result<Option<f64>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(|v| Some(default.to_metric(v)))
            .ok_or_else(|| n.to_string()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_measurement(s, default)
            .map(Some)
            .map_err(|e| e.to_string()),
        Some(other) => Err(other.to_string()),
    }
}

/// Rows parsed from one document
struct RowParser<'a> {
    format: &'a ArchiveFormat,
    records: Vec<RawObservation>,
    malformed: usize,
}

impl<'a> RowParser<'a> {
    fn new(format: &'a ArchiveFormat) -> Self {
        Self {
            format,
            records: Vec::new(),
            malformed: 0,
        }
    }

    fn malformed_row(&mut self, line: usize, error: impl std::fmt::Display) {
        warn!(line, error = %error, "Skipping malformed archive row");
        self.malformed += 1;
    }

    fn value(&mut self, cells: &Cells, field: ArchiveField, unit: Unit, line: usize) -> Option<f64> {
        match cell(cells.get(&field), unit) {
            Ok(value) => value,
            Err(err) => {
                warn!(line, column = field.name(), error = %err, "Unreadable archive value");
                self.malformed += 1;
                None
            }
        }
    }

    fn push(&mut self, cells: Cells, line: usize) {
        let Some(timestamp) = cells
            .get(&ArchiveField::Time)
            .and_then(|time| parse_timestamp(time, self.format.timezone))
        else {
            let shown = cells.get(&ArchiveField::Time).map(Value::to_string);
            self.malformed_row(line, format!("unreadable timestamp {shown:?}"));
            return;
        };

        let wind_unit = self.format.wind_unit;
        let wind = self.value(&cells, ArchiveField::Wind, wind_unit, line);
        let pressure = match self.value(&cells, ArchiveField::Pressure, Unit::Hectopascal, line) {
            Some(raw) => {
                let repaired = repair_pressure(raw);
                if repaired.is_none() {
                    warn!(line, value = raw, "Implausible archive pressure");
                    self.malformed += 1;
                }
                repaired
            }
            None => None,
        };

        let obs = RawObservation {
            timestamp,
            temperature_c: self.value(&cells, ArchiveField::Temperature, Unit::Celsius, line),
            humidity_pct: self.value(&cells, ArchiveField::Humidity, Unit::Percent, line),
            pressure_hpa: pressure,
            wind_speed_kmh: wind,
            // exports without a gust column report the mean wind there
            wind_gust_kmh: self.value(&cells, ArchiveField::Gust, wind_unit, line).or(wind),
            wind_dir_deg: self.value(&cells, ArchiveField::WindDir, Unit::Degree, line),
            rain_mm: self.value(&cells, ArchiveField::Rain, Unit::Millimeter, line),
            wind_speed_ms: None,
        };

        if obs.is_empty() {
            debug!(line, timestamp, "Archive row has no readable value");
            return;
        }
        self.records.push(obs.with_derived());
    }

    fn finish(self) -> ChunkBatch<RawObservation> {
        ChunkBatch::new(self.records, self.malformed)
    }
}

fn json_cells(object: Map<String, Value>, columns: &ArchiveColumns) -> Cells {
    let keys: Vec<&str> = object.keys().map(String::as_str).collect();
    ArchiveField::ALL
        .iter()
        .filter_map(|field| {
            columns
                .resolve(*field, &keys)
                .and_then(|key| object.get(key))
                .map(|value| (*field, value.clone()))
        })
        .collect()
}

/// Parse a JSON-lines document, one object per line
pub fn parse_archive(text: &str, format: &ArchiveFormat) -> ChunkBatch<RawObservation> {
    let mut parser = RowParser::new(format);

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Map<String, Value>>(line) {
            Ok(object) => parser.push(json_cells(object, &format.columns), idx + 1),
            Err(err) => parser.malformed_row(idx + 1, err),
        }
    }

    parser.finish()
}

/// Parse a CSV document with a header row
pub fn parse_csv(text: &str, format: &ArchiveFormat) -> ChunkBatch<RawObservation> {
    let mut parser = RowParser::new(format);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(err) => {
            parser.malformed_row(1, err);
            return parser.finish();
        }
    };
    let keys: Vec<&str> = headers.iter().collect();
    let indices: Vec<(ArchiveField, usize)> = ArchiveField::ALL
        .iter()
        .filter_map(|field| {
            let name = format.columns.resolve(*field, &keys)?;
            keys.iter().position(|key| *key == name).map(|idx| (*field, idx))
        })
        .collect();
    if !indices.iter().any(|(field, _)| *field == ArchiveField::Time) {
        warn!(columns = ?keys, "CSV archive has no time column");
    }

    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        match record {
            Ok(record) => {
                let cells = indices
                    .iter()
                    .filter_map(|(field, i)| {
                        record
                            .get(*i)
                            .filter(|v| !v.is_empty())
                            .map(|v| (*field, Value::String(v.to_string())))
                    })
                    .collect();
                parser.push(cells, line);
            }
            Err(err) => parser.malformed_row(line, err),
        }
    }

    parser.finish()
}

fn is_pattern(path: &Path) -> bool {
    path.to_string_lossy().contains(['*', '?', '['])
}

fn is_archive_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("jsonl"))
}

fn is_csv(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> IngestError {
    IngestError::SourceUnavailable(format!("{}: {err}", path.display()))
}

/// Station client reading archive exports
pub struct ArchiveFileClient {
    path: PathBuf,
    format: ArchiveFormat,
}

impl ArchiveFileClient {
    /// `path` is one file, a directory of exports, or a glob pattern
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: ArchiveFormat::default(),
        }
    }

    /// Unit assumed for wind values without a suffix
    pub fn with_wind_unit(mut self, unit: Unit) -> Self {
        self.format.wind_unit = unit;
        self
    }

    /// Zone of naive timestamps, UTC when unset
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.format.timezone = tz;
        self
    }

    pub fn with_columns(mut self, columns: ArchiveColumns) -> Self {
        self.format.columns = columns;
        self
    }

    async fn files(&self) -> IngestResult<Vec<PathBuf>> {
        if is_pattern(&self.path) {
            return self.glob_files().await;
        }

        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| unavailable(&self.path, e))?;
        if !metadata.is_dir() {
            return Ok(vec![self.path.clone()]);
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| unavailable(&self.path, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(&self.path, e))?
        {
            let path = entry.path();
            if is_archive_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn glob_files(&self) -> IngestResult<Vec<PathBuf>> {
        let pattern = self.path.to_string_lossy().into_owned();
        let matches = tokio::task::spawn_blocking(move || {
            glob::glob(&pattern).map(|paths| paths.filter_map(Result::ok).collect::<Vec<_>>())
        })
        .await
        .map_err(|e| unavailable(&self.path, e))?
        .map_err(|e| IngestError::Config(format!("invalid station path pattern: {e}")))?;

        let mut files: Vec<PathBuf> = matches.into_iter().filter(|p| p.is_file()).collect();
        if files.is_empty() {
            return Err(unavailable(&self.path, "no files match"));
        }
        files.sort();
        Ok(files)
    }
}

async fn read_file(path: &Path) -> IngestResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| unavailable(path, e))
}

#[async_trait::async_trait]
impl SourceClient for ArchiveFileClient {
    type Record = RawObservation;

    fn name(&self) -> &str {
        "archive-file"
    }

    fn max_span(&self) -> i64 {
        i64::MAX
    }

    #[instrument(skip(self), fields(source = "archive-file"))]
    async fn fetch_chunk(&self, range: TimeRange) -> IngestResult<ChunkBatch<RawObservation>> {
        let mut records = Vec::new();
        let mut malformed = 0;

        for file in self.files().await? {
            let text = read_file(&file).await?;
            let batch = if is_csv(&file) {
                parse_csv(&text, &self.format)
            } else {
                parse_archive(&text, &self.format)
            };
            debug!(
                file = %file.display(),
                records = batch.records.len(),
                malformed = batch.malformed,
                "Read archive file"
            );
            malformed += batch.malformed;
            records.extend(batch.records.into_iter().filter(|r| range.contains(r.timestamp)));
        }

        Ok(ChunkBatch::new(records, malformed))
    }
}
