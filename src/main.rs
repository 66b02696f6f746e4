// Main entry point - Dependency injection, one-shot pipeline run and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::complaints_service::ComplaintsService;
use crate::application::fuel_economy_service::FuelEconomyService;
use crate::application::stations_service::StationsService;
use crate::domain::harvest::StageReport;
use crate::infrastructure::bigquery_warehouse::BigQueryWarehouse;
use crate::infrastructure::config::{load_complaints_mapping, load_etl_config, load_stations_mapping};
use crate::infrastructure::http_source::HttpSource;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    complaints_extract, complaints_load, complaints_transform, fuel_extract, fuel_load, health_check,
    stations_extract, stations_load, stations_transform,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_etl_config()?;
    let complaints_mapping = load_complaints_mapping(&config.storage.mappings_dir)?;
    let stations_mapping = load_stations_mapping(&config.storage.mappings_dir)?;

    // Create adapters (infrastructure layer)
    let source = Arc::new(HttpSource::new(config.sources.timeout_secs)?);
    let warehouse = Arc::new(BigQueryWarehouse::new(
        config.warehouse.base_url.clone(),
        config.warehouse.upload_url.clone(),
        config.warehouse.project_id.clone(),
        config.warehouse.access_token.clone(),
    ));

    // Create services (application layer)
    let data_dir = config.storage.data_dir.clone();
    let complaints_service = ComplaintsService::new(
        source.clone(),
        warehouse.clone(),
        config.sources.clone(),
        complaints_mapping,
        data_dir.clone(),
        config.pipeline.effective_workers(),
    )
    .with_write_mode(config.warehouse.write_mode);
    let stations_service = StationsService::new(
        source.clone(),
        warehouse.clone(),
        config.sources.clone(),
        stations_mapping,
        data_dir.clone(),
    )
    .with_write_mode(config.warehouse.write_mode);
    let fuel_economy_service = FuelEconomyService::new(source, warehouse, config.sources.clone(), data_dir)
        .with_write_mode(config.warehouse.write_mode);

    let state = Arc::new(AppState {
        complaints_service,
        stations_service,
        fuel_economy_service,
    });

    if std::env::args().nth(1).as_deref() == Some("run") {
        return run_pipeline(&state, config.warehouse.enabled).await;
    }

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/complaints/extract", post(complaints_extract))
        .route("/complaints/transform", post(complaints_transform))
        .route("/complaints/load", post(complaints_load))
        .route("/stations/extract", post(stations_extract))
        .route("/stations/transform", post(stations_transform))
        .route("/stations/load", post(stations_load))
        .route("/fuel/extract", post(fuel_extract))
        .route("/fuel/load", post(fuel_load))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid server bind address {}", config.server.bind))?;
    tracing::info!("Starting autodata-etl service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}

/// Every stage of every dataset, in order. Loads run only with the warehouse enabled.
async fn run_pipeline(state: &AppState, load: bool) -> anyhow::Result<()> {
    let mut reports = vec![
        state.complaints_service.extract().await?,
        state.complaints_service.transform().await?,
        state.stations_service.extract().await?,
    ];

    // A failed download leaves nothing to transform or load
    let stations_extracted = reports.last().is_some_and(|r| r.failures.is_empty());
    if stations_extracted {
        reports.push(state.stations_service.transform().await?);
    }
    let fuel = state.fuel_economy_service.extract().await?;
    let fuel_extracted = fuel.failures.is_empty();
    reports.push(fuel);

    if load {
        reports.push(state.complaints_service.load().await?);
        if stations_extracted {
            reports.push(state.stations_service.load().await?);
        }
        if fuel_extracted {
            reports.push(state.fuel_economy_service.load().await?);
        }
    } else {
        tracing::info!("Warehouse disabled, skipping load stages");
    }

    for report in &reports {
        log_report(report);
    }
    Ok(())
}

fn log_report(report: &StageReport) {
    tracing::info!("{} {}: {} rows", report.dataset, report.stage, report.rows);
    for failure in &report.failures {
        tracing::warn!("  {} {} failed: {}", failure.operation, failure.target, failure.reason);
    }
}
