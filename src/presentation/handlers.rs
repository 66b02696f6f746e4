// HTTP request handlers
use crate::domain::harvest::StageReport;
use crate::presentation::app_state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Stage reports go out as JSON; a stage that aborts answers 500 with its error.
fn stage_response(result: anyhow::Result<StageReport>) -> Response {
    match result {
        Ok(report) => {
            tracing::info!(
                "{} {} finished: {} rows, {} failures",
                report.dataset,
                report.stage,
                report.rows,
                report.failures.len()
            );
            Json(report).into_response()
        }
        Err(e) => {
            tracing::error!("Stage failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("{:#}", e) })),
            )
                .into_response()
        }
    }
}

pub async fn complaints_extract(State(state): State<Arc<AppState>>) -> Response {
    stage_response(state.complaints_service.extract().await)
}

pub async fn complaints_transform(State(state): State<Arc<AppState>>) -> Response {
    stage_response(state.complaints_service.transform().await)
}

pub async fn complaints_load(State(state): State<Arc<AppState>>) -> Response {
    stage_response(state.complaints_service.load().await)
}

pub async fn stations_extract(State(state): State<Arc<AppState>>) -> Response {
    stage_response(state.stations_service.extract().await)
}

pub async fn stations_transform(State(state): State<Arc<AppState>>) -> Response {
    stage_response(state.stations_service.transform().await)
}

pub async fn stations_load(State(state): State<Arc<AppState>>) -> Response {
    stage_response(state.stations_service.load().await)
}

pub async fn fuel_extract(State(state): State<Arc<AppState>>) -> Response {
    stage_response(state.fuel_economy_service.extract().await)
}

pub async fn fuel_load(State(state): State<Arc<AppState>>) -> Response {
    stage_response(state.fuel_economy_service.load().await)
}
