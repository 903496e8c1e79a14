//! Tabular risk prediction

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use healthai_core::attribution::{explain_row, Attributions};
use healthai_core::model::align_row;
use healthai_core::{ModelError, RiskCategory, RiskThresholds};
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use validator::Validate;

use crate::models::{NewPredictionLog, PredictionLog};
use crate::{AppResult, AppState};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RequestContext {
    #[validate(length(max = 128))]
    pub user_id: Option<String>,
    #[validate(length(max = 128))]
    pub patient_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TabularRequest {
    #[validate(length(min = 1, max = 64))]
    pub model_id: String,

    #[serde(default)]
    #[validate(nested)]
    pub context: Option<RequestContext>,

    pub features: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct TabularResponse {
    pub probability: f64,
    pub category: RiskCategory,
    /// Feature → contribution, largest magnitude first
    pub attributions: Map<String, Value>,
    pub thresholds: RiskThresholds,
}

/// Score one feature row, attribute it, and write the audit record.
pub async fn predict(
    State(state): State<AppState>,
    body: Result<Json<TabularRequest>, JsonRejection>,
) -> AppResult<Json<TabularResponse>> {
    let Json(req) = body?;
    req.validate()?;

    let bundle = state.registry.tabular(&req.model_id)?.clone();
    let row = align_row(&req.features, &bundle.feature_columns);
    let attribution = state.config.attribution.clone();

    let (probability, attributions) = tokio::task::spawn_blocking(move || {
        let proba = bundle.model.predict_proba(row.view().insert_axis(Axis(0)))?;
        let probability = proba
            .get(0)
            .copied()
            .ok_or_else(|| ModelError::Shape("model returned no probability".to_string()))?;
        let attributions = explain_row(bundle.model.as_ref(), &bundle.feature_columns, row.view(), &attribution);
        Ok::<_, ModelError>((probability, attributions))
    })
    .await??;

    if let Attributions::Unavailable { reason } = &attributions {
        tracing::debug!("No attributions for {}: {}", req.model_id, reason);
    }
    let attributions: Map<String, Value> = attributions
        .top_k(state.config.attribution.top_k)
        .into_iter()
        .map(|a| (a.feature, json!(a.value)))
        .collect();

    let thresholds = state.config.thresholds;
    let category = thresholds.categorize(probability);

    let context = req.context.unwrap_or_default();
    PredictionLog::create(
        &state.pool,
        NewPredictionLog {
            user_id: context.user_id,
            patient_id: context.patient_id,
            model_id: req.model_id.clone(),
            inputs: Value::Object(req.features),
            outputs: json!({
                "probability": probability,
                "category": category,
                "attributions": attributions,
            }),
        },
    )
    .await?;

    tracing::info!(
        "Tabular prediction: model={} probability={:.4} category={}",
        req.model_id,
        probability,
        category.as_str()
    );

    Ok(Json(TabularResponse {
        probability,
        category,
        attributions,
        thresholds,
    }))
}
