//! Loaded model listing

use axum::{extract::State, Json};
use healthai_core::model::{Device, ModelInfo};
use healthai_core::ModelBundle;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    #[serde(flatten)]
    info: ModelInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    feature_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<Device>,
}

impl From<&ModelBundle> for ModelEntry {
    fn from(bundle: &ModelBundle) -> Self {
        match bundle {
            ModelBundle::Tabular(b) => Self {
                info: b.info.clone(),
                feature_columns: Some(b.feature_columns.clone()),
                labels: None,
                device: None,
            },
            ModelBundle::Image(b) => Self {
                info: b.info.clone(),
                feature_columns: None,
                labels: b.labels.clone(),
                device: Some(b.device),
            },
        }
    }
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<ModelEntry>> {
    Json(state.registry.iter().map(|(_, b)| ModelEntry::from(b)).collect())
}
