//! Deployment configuration
//!
//! Read from a TOML file (`$WX_CONFIG`, default `weather.toml`), then
//! overridden by the environment variables the station deployment has always
//! used (`SQLITE_PATH`, `ECOWITT_*`, `STATION_*`, `OWM_API_KEY`, `LAT`, `LON`,
//! `BACKFILL_HOURS`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "weather.toml";
pub const DEFAULT_ECOWITT_URL: &str = "https://api.ecowitt.net/api/v3";
pub const DEFAULT_OPENWEATHER_URL: &str = "https://api.openweathermap.org/data/2.5";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/weather.db"),
        }
    }
}

/// The one station source of a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StationConfig {
    EcowittCloud {
        application_key: String,
        api_key: String,
        mac: String,
        #[serde(default = "default_ecowitt_url")]
        base_url: String,
        /// `5min`, `30min`, `4hour` or `1day`
        #[serde(default)]
        cycle_type: Option<String>,
    },
    EcowittLan {
        base_url: String,
    },
    ArchiveFile {
        /// File, directory, or glob pattern of CSV / JSON-lines exports
        path: PathBuf,
        /// Unit of wind values without a suffix, `km/h` when absent
        #[serde(default)]
        wind_unit: Option<String>,
        /// IANA zone of timestamps without an offset, UTC when absent
        #[serde(default)]
        timezone: Option<String>,
        #[serde(default)]
        columns: ArchiveColumnNames,
    },
}

impl StationConfig {
    /// Archive feed at `path` with every other setting at its default
    pub fn archive_file(path: impl Into<PathBuf>) -> Self {
        StationConfig::ArchiveFile {
            path: path.into(),
            wind_unit: None,
            timezone: None,
            columns: ArchiveColumnNames::default(),
        }
    }
}

/// Export column names that differ from the recognized aliases
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveColumnNames {
    pub time: Option<String>,
    pub temperature: Option<String>,
    pub humidity: Option<String>,
    pub pressure: Option<String>,
    pub wind: Option<String>,
    pub gust: Option<String>,
    pub wind_dir: Option<String>,
    pub rain: Option<String>,
}

fn default_ecowitt_url() -> String {
    DEFAULT_ECOWITT_URL.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub api_key: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_openweather_url")]
    pub base_url: String,
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u64,
}

fn default_openweather_url() -> String {
    DEFAULT_OPENWEATHER_URL.to_string()
}

fn default_horizon_hours() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub backfill_hours: u64,
    /// Unix seconds; nothing earlier is fetched
    pub not_before: i64,
    pub station_chunk_hours: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
    pub retry_backoff_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            backfill_hours: 72,
            not_before: 0,
            station_chunk_hours: 24,
            fetch_timeout_secs: 20,
            fetch_retries: 1,
            retry_backoff_secs: 5,
        }
    }
}

impl PipelineSettings {
    pub fn backfill(&self) -> Duration {
        hours(self.backfill_hours)
    }

    pub fn station_chunk(&self) -> Duration {
        hours(self.station_chunk_hours)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub station: Option<StationConfig>,
    pub forecast: Option<ForecastConfig>,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid environment variable {name}: {reason}")]
    Env { name: String, reason: String },
}

fn env_error(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Env {
        name: name.to_string(),
        reason: reason.into(),
    }
}

impl AppConfig {
    /// Load from `$WX_CONFIG` and the process environment, then validate
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("WX_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_with(Path::new(&path), |name| std::env::var(name).ok())
    }

    /// Load from `path` (defaults when it does not exist) with env lookups
    /// through `lookup`, then validate
    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = if path.exists() {
            let s = fs::read_to_string(path)?;
            toml::from_str::<AppConfig>(&s)?
        } else {
            AppConfig::default()
        };
        cfg.apply_env(lookup)?;
        cfg.normalize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply environment overrides on top of the file values
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(path) = var("SQLITE_PATH") {
            self.database.path = PathBuf::from(path);
        }

        let app_key = var("ECOWITT_APPLICATION_KEY");
        let api_key = var("ECOWITT_API_KEY");
        let env_mac = var("ECOWITT_MAC");
        match &mut self.station {
            Some(StationConfig::EcowittCloud {
                application_key,
                api_key: key,
                mac,
                ..
            }) => {
                if let Some(v) = app_key {
                    *application_key = v;
                }
                if let Some(v) = api_key {
                    *key = v;
                }
                if let Some(v) = env_mac {
                    *mac = v;
                }
            }
            None => match (app_key, api_key, env_mac) {
                (Some(application_key), Some(api_key), Some(mac)) => {
                    self.station = Some(StationConfig::EcowittCloud {
                        application_key,
                        api_key,
                        mac,
                        base_url: default_ecowitt_url(),
                        cycle_type: None,
                    });
                }
                (None, None, None) => {}
                _ => {
                    return Err(env_error(
                        "ECOWITT_*",
                        "ECOWITT_APPLICATION_KEY, ECOWITT_API_KEY and ECOWITT_MAC must be set together",
                    ))
                }
            },
            // another station kind is configured explicitly
            Some(_) => {}
        }

        if let Some(path) = var("STATION_CSV") {
            match &mut self.station {
                None => self.station = Some(StationConfig::archive_file(path)),
                Some(StationConfig::ArchiveFile { path: current, .. }) => {
                    *current = PathBuf::from(path);
                }
                Some(_) => {
                    return Err(env_error(
                        "STATION_CSV",
                        "another station source is already configured",
                    ))
                }
            }
        }
        if let Some(StationConfig::ArchiveFile {
            wind_unit,
            timezone,
            columns,
            ..
        }) = &mut self.station
        {
            if let Some(v) = var("STATION_WIND_UNIT") {
                *wind_unit = Some(v);
            }
            if let Some(v) = var("STATION_TZ") {
                *timezone = Some(v);
            }
            let overrides = [
                ("STATION_TIME_COL", &mut columns.time),
                ("STATION_TEMP_COL", &mut columns.temperature),
                ("STATION_HUM_COL", &mut columns.humidity),
                ("STATION_PRESS_COL", &mut columns.pressure),
                ("STATION_WIND_COL", &mut columns.wind),
                ("STATION_GUST_COL", &mut columns.gust),
                ("STATION_RAIN_COL", &mut columns.rain),
            ];
            for (name, column) in overrides {
                if let Some(v) = var(name) {
                    *column = Some(v);
                }
            }
        }

        let owm_key = var("OWM_API_KEY");
        let lat = var("LAT").map(|v| parse_env::<f64>("LAT", &v)).transpose()?;
        let lon = var("LON").map(|v| parse_env::<f64>("LON", &v)).transpose()?;
        match &mut self.forecast {
            Some(forecast) => {
                if let Some(v) = owm_key {
                    forecast.api_key = v;
                }
                if let Some(v) = lat {
                    forecast.lat = v;
                }
                if let Some(v) = lon {
                    forecast.lon = v;
                }
            }
            None => match (owm_key, lat, lon) {
                (Some(api_key), Some(lat), Some(lon)) => {
                    self.forecast = Some(ForecastConfig {
                        api_key,
                        lat,
                        lon,
                        base_url: default_openweather_url(),
                        horizon_hours: default_horizon_hours(),
                    });
                }
                (Some(_), _, _) => {
                    return Err(env_error("OWM_API_KEY", "LAT and LON are required with it"))
                }
                _ => {}
            },
        }

        if let Some(v) = var("BACKFILL_HOURS") {
            self.pipeline.backfill_hours = parse_env("BACKFILL_HOURS", &v)?;
        }
        Ok(())
    }

    /// Canonicalize values that have several accepted spellings
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        if let Some(StationConfig::EcowittCloud { mac, .. }) = &mut self.station {
            *mac = normalize_mac(mac)?;
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.station {
            None => return Err(invalid("no station source configured")),
            Some(StationConfig::EcowittCloud {
                application_key,
                api_key,
                mac,
                base_url,
                ..
            }) => {
                require("station.application_key", application_key)?;
                require("station.api_key", api_key)?;
                normalize_mac(mac)?;
                check_url("station.base_url", base_url)?;
            }
            Some(StationConfig::EcowittLan { base_url }) => {
                check_url("station.base_url", base_url)?;
            }
            Some(StationConfig::ArchiveFile { path, timezone, .. }) => {
                if path.as_os_str().is_empty() {
                    return Err(invalid("station.path is empty"));
                }
                if let Some(tz) = timezone {
                    tz.parse::<chrono_tz::Tz>()
                        .map_err(|e| invalid(format!("station.timezone {tz:?}: {e}")))?;
                }
            }
        }

        if let Some(forecast) = &self.forecast {
            require("forecast.api_key", &forecast.api_key)?;
            check_url("forecast.base_url", &forecast.base_url)?;
            if !(-90.0..=90.0).contains(&forecast.lat) {
                return Err(invalid(format!("forecast.lat {} out of range", forecast.lat)));
            }
            if !(-180.0..=180.0).contains(&forecast.lon) {
                return Err(invalid(format!("forecast.lon {} out of range", forecast.lon)));
            }
            if forecast.horizon_hours == 0 {
                return Err(invalid("forecast.horizon_hours must be positive"));
            }
        }

        if self.database.path.as_os_str().is_empty() {
            return Err(invalid("database.path is empty"));
        }
        if self.pipeline.station_chunk_hours == 0 {
            return Err(invalid("pipeline.station_chunk_hours must be positive"));
        }
        if self.pipeline.fetch_timeout_secs == 0 {
            return Err(invalid("pipeline.fetch_timeout_secs must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn require(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{name} is empty")));
    }
    Ok(())
}

fn check_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(format!("{name} {value:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("{name} has unsupported scheme {other:?}"))),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| env_error(name, e.to_string()))
}

/// Upper-case colon form, e.g. `AA:BB:CC:DD:EE:FF`
pub fn normalize_mac(mac: &str) -> Result<String, ConfigError> {
    let digits: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
        .collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid(format!("invalid MAC address {mac:?}")));
    }

    let upper = digits.to_ascii_uppercase();
    let pairs: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Ok(pairs.join(":"))
}
