//! Health check handlers

use axum::{extract::State, Json};
use healthai_core::RiskThresholds;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct RootResponse {
    ok: bool,
    message: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    ok: bool,
    models_loaded: Vec<String>,
    thresholds: RiskThresholds,
    version: &'static str,
    timestamp: i64,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        ok: true,
        message: "Health AI prediction API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        models_loaded: state.registry.ids(),
        thresholds: state.config.thresholds,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
    })
}
