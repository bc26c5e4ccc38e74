//! Source clients and pipeline settings from the deployment configuration

use anyhow::{bail, Context, Result};
use wx_config::{AppConfig, ArchiveColumnNames, ForecastConfig, PipelineSettings, StationConfig};
use wx_core::{Unit, UnitGroup};
use wx_ingest::{
    ArchiveColumns, ArchiveField, ArchiveFileClient, CycleType, EcowittCloudClient, EcowittCredentials, EcowittLanClient,
    ForecastClient, ForecastLocation, OpenWeatherClient, StationClient,
};
use wx_pipeline::PipelineConfig;

pub fn station_client(config: &AppConfig) -> Result<StationClient> {
    let timeout = config.pipeline.fetch_timeout();
    let Some(station) = &config.station else {
        bail!("no station source configured");
    };

    let client: StationClient = match station {
        StationConfig::EcowittCloud {
            application_key,
            api_key,
            mac,
            base_url,
            cycle_type,
        } => {
            let credentials = EcowittCredentials {
                application_key: application_key.clone(),
                api_key: api_key.clone(),
                mac: mac.clone(),
            };
            let cycle = match cycle_type {
                Some(cycle) => cycle.parse::<CycleType>()?,
                None => CycleType::default(),
            };
            Box::new(EcowittCloudClient::new(base_url, credentials, timeout)?.with_cycle(cycle))
        }
        StationConfig::EcowittLan { base_url } => Box::new(EcowittLanClient::new(base_url, timeout)?),
        StationConfig::ArchiveFile {
            path,
            wind_unit,
            timezone,
            columns,
        } => {
            let mut client = ArchiveFileClient::new(path).with_columns(archive_columns(columns));
            if let Some(unit) = wind_unit {
                client = client.with_wind_unit(parse_wind_unit(unit)?);
            }
            if let Some(tz) = timezone {
                let tz = tz
                    .parse::<chrono_tz::Tz>()
                    .map_err(|e| anyhow::anyhow!("station.timezone {tz:?}: {e}"))?;
                client = client.with_timezone(tz);
            }
            Box::new(client)
        }
    };
    Ok(client)
}

fn archive_columns(names: &ArchiveColumnNames) -> ArchiveColumns {
    let configured = [
        (ArchiveField::Time, &names.time),
        (ArchiveField::Temperature, &names.temperature),
        (ArchiveField::Humidity, &names.humidity),
        (ArchiveField::Pressure, &names.pressure),
        (ArchiveField::Wind, &names.wind),
        (ArchiveField::Gust, &names.gust),
        (ArchiveField::WindDir, &names.wind_dir),
        (ArchiveField::Rain, &names.rain),
    ];
    configured
        .into_iter()
        .fold(ArchiveColumns::default(), |columns, (field, name)| match name {
            Some(name) => columns.with_column(field, name.clone()),
            None => columns,
        })
}

fn parse_wind_unit(value: &str) -> Result<Unit> {
    let unit = value
        .parse::<Unit>()
        .with_context(|| format!("station.wind_unit {value:?}"))?;
    if unit.group() != UnitGroup::Speed {
        bail!("station.wind_unit {value:?} is not a speed unit");
    }
    Ok(unit)
}

pub fn forecast_client(config: &AppConfig) -> Result<Option<ForecastClient>> {
    let Some(forecast) = &config.forecast else {
        return Ok(None);
    };
    let location = ForecastLocation {
        api_key: forecast.api_key.clone(),
        lat: forecast.lat,
        lon: forecast.lon,
    };
    let client = OpenWeatherClient::new(&forecast.base_url, location, config.pipeline.fetch_timeout())?;
    Ok(Some(Box::new(client)))
}

pub fn pipeline_config(settings: &PipelineSettings, forecast: Option<&ForecastConfig>) -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        backfill: settings.backfill(),
        not_before: settings.not_before,
        station_chunk: settings.station_chunk(),
        forecast_horizon: forecast
            .map(|f| std::time::Duration::from_secs(f.horizon_hours.saturating_mul(3600)))
            .unwrap_or(defaults.forecast_horizon),
        fetch_timeout: settings.fetch_timeout(),
        fetch_retries: settings.fetch_retries,
        retry_backoff: settings.retry_backoff(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use wx_ingest::SourceClient;

    fn archive_config(wind_unit: Option<&str>, timezone: Option<&str>) -> AppConfig {
        AppConfig {
            station: Some(StationConfig::ArchiveFile {
                path: PathBuf::from("archive"),
                wind_unit: wind_unit.map(str::to_string),
                timezone: timezone.map(str::to_string),
                columns: ArchiveColumnNames::default(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_archive_station() {
        let client = station_client(&archive_config(Some("m/s"), Some("Europe/Rome"))).unwrap();
        assert_eq!(client.name(), "archive-file");
        assert!(station_client(&archive_config(Some("hPa"), None)).is_err());
        assert!(station_client(&archive_config(Some("furlongs"), None)).is_err());
        assert!(station_client(&archive_config(None, Some("Mars/Olympus"))).is_err());
    }

    #[tokio::test]
    async fn test_archive_station_uses_configured_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        std::fs::write(&path, "local_time,outside_c\n2023-11-14 23:13:20,12.5\n").unwrap();
        let config = AppConfig {
            station: Some(StationConfig::ArchiveFile {
                path,
                wind_unit: None,
                timezone: Some("Europe/Rome".into()),
                columns: ArchiveColumnNames {
                    time: Some("local_time".into()),
                    temperature: Some("outside_c".into()),
                    ..Default::default()
                },
            }),
            ..Default::default()
        };

        let client = station_client(&config).unwrap();
        let report = client.fetch(1_699_990_000, 1_700_010_000).await.unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].timestamp, 1_700_000_000);
        assert_eq!(report.records[0].temperature_c, Some(12.5));
    }

    #[test]
    fn test_cloud_station_rejects_unknown_cycle() {
        let config = AppConfig {
            station: Some(StationConfig::EcowittCloud {
                application_key: "app".into(),
                api_key: "key".into(),
                mac: "AA:BB:CC:DD:EE:FF".into(),
                base_url: wx_config::DEFAULT_ECOWITT_URL.into(),
                cycle_type: Some("hourly".into()),
            }),
            ..Default::default()
        };
        assert!(station_client(&config).is_err());
    }

    #[test]
    fn test_forecast_disabled_without_config() {
        assert!(forecast_client(&AppConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_pipeline_settings_mapped() {
        let forecast = ForecastConfig {
            api_key: "owm".into(),
            lat: 0.0,
            lon: 0.0,
            base_url: wx_config::DEFAULT_OPENWEATHER_URL.into(),
            horizon_hours: 48,
        };
        let config = pipeline_config(&PipelineSettings::default(), Some(&forecast));
        assert_eq!(config.backfill, Duration::from_secs(72 * 3600));
        assert_eq!(config.forecast_horizon, Duration::from_secs(48 * 3600));
        assert_eq!(config.fetch_retries, 1);

        let config = pipeline_config(&PipelineSettings::default(), None);
        assert_eq!(config, PipelineConfig::default());
    }
}
