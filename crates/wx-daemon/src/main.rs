//! wxd - run one ingestion cycle and exit
//!
//! This binary coordinates:
//! - Station and forecast fetching (via source clients)
//! - Raw upserts and 3-hour aggregation
//! - Watermark commits in the SQLite store
//!
//! Meant to be invoked by an external scheduler. The exit status is zero
//! only when the cycle committed. `wxd repair` fixes stored pressure
//! readings and rebuilds the affected buckets.

mod cli;
mod sources;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wx_archive::{BucketAggregator, RepairReport};
use wx_config::AppConfig;
use wx_core::Timestamp;
use wx_db::TimeSeriesStore;
use wx_pipeline::{CycleSummary, IngestPipeline};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    wx_obs::init("wxd");

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run().await.map(|summary| summary.is_committed()),
        Command::Repair { since, until } => repair(since, until).await.map(|_| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("wxd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn open_store(config: &AppConfig) -> Result<TimeSeriesStore> {
    let store = TimeSeriesStore::open(&config.database.path)
        .await
        .context("Failed to open time-series store")?;
    store.ping().await.context("Store ping failed")?;
    Ok(store)
}

async fn run() -> Result<CycleSummary> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        database = %config.database.path.display(),
        forecast = config.forecast.is_some(),
        "Loaded configuration"
    );

    let store = open_store(&config).await?;

    let station = sources::station_client(&config).context("Failed to build station client")?;
    let pipeline_config = sources::pipeline_config(&config.pipeline, config.forecast.as_ref());
    let mut pipeline = IngestPipeline::new(store.clone(), station, pipeline_config);
    if let Some(forecast) =
        sources::forecast_client(&config).context("Failed to build forecast client")?
    {
        pipeline = pipeline.with_forecast(forecast);
    }

    // Ctrl+C stops the cycle at the next chunk boundary
    let cancel = pipeline.cancellation_token();
    spawn_shutdown_handler(cancel.clone());

    let summary = pipeline.run_cycle().await;
    cancel.cancel();

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to render cycle summary")?
    );

    store.close().await;
    Ok(summary)
}

async fn repair(since: Option<Timestamp>, until: Option<Timestamp>) -> Result<RepairReport> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    let store = open_store(&config).await?;

    let since = since.unwrap_or(0);
    let until = until.unwrap_or_else(|| Utc::now().timestamp());
    info!(since, until, "Repairing stored station data");

    let report = BucketAggregator::new(store.clone())
        .repair_window(since, until)
        .await
        .context("Repair failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render repair report")?
    );

    store.close().await;
    Ok(report)
}

fn spawn_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    warn!("Interrupt received, stopping after the current chunk");
                    cancel.cancel();
                }
                Err(e) => error!("Failed to listen for interrupt: {}", e),
            },
            _ = cancel.cancelled() => {}
        }
    });
}
