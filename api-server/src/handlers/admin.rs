//! Audit log listings

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Deserialize;

use crate::models::{PredictionLog, SimulationLog};
use crate::{AppResult, AppState};

/// `?limit=N`; a negative or non-numeric value is a 400.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

/// Most recent predictions first
pub async fn predictions(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<Vec<PredictionLog>>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(state.config.admin_default_limit);
    let rows = PredictionLog::list_recent(&state.pool, limit).await?;
    Ok(Json(rows))
}

/// Most recent simulations first
pub async fn simulations(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<Vec<SimulationLog>>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(state.config.admin_default_limit);
    let rows = SimulationLog::list_recent(&state.pool, limit).await?;
    Ok(Json(rows))
}
