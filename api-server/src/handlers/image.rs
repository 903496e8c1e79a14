//! Image classification with a visual explanation

use axum::{
    extract::{multipart::MultipartRejection, rejection::QueryRejection, Multipart, Query, State},
    Json,
};
use healthai_core::explain::{explain_image, ExplainMethod};
use healthai_core::imaging;
use healthai_core::model::ClassSelection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::{NewPredictionLog, PredictionLog};
use crate::{AppError, AppResult, AppState};

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub model_id: String,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub top_class: String,
    pub top_prob: f64,
    /// Label → probability, in class order
    pub probs: Map<String, Value>,
    /// `data:image/png;base64,...` overlay
    pub explanation_b64: String,
}

struct Inference {
    selection: ClassSelection,
    method: ExplainMethod,
    overlay: String,
}

pub async fn predict(
    State(state): State<AppState>,
    query: Result<Query<ImageQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<ImageResponse>> {
    let Query(query) = query?;
    let bundle = state.registry.image(&query.model_id)?.clone();

    let mut multipart = multipart
        .map_err(|e| AppError::ValidationError(format!("Invalid upload: {}", e.body_text())))?;
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            let filename = field.file_name().map(str::to_string);
            upload = Some((filename, field.bytes().await?));
            break;
        }
    }
    let (filename, bytes) = upload
        .ok_or_else(|| AppError::ValidationError(format!("Missing multipart field '{}'", UPLOAD_FIELD)))?;
    if bytes.is_empty() {
        return Err(AppError::ValidationError("Uploaded file is empty".to_string()));
    }

    let worker_bundle = bundle.clone();
    let inference = tokio::task::spawn_blocking(move || -> AppResult<Inference> {
        let bundle = worker_bundle;
        let prepared = imaging::prepare(&bytes, bundle.input_size)?;

        let logits = bundle.model.forward(&prepared.tensor)?;
        let first = logits
            .outer_iter()
            .next()
            .ok_or_else(|| AppError::InternalError("model returned no logits".to_string()))?;
        // Report and explain the most probable class; a binary head would
        // otherwise default to the positive one.
        let top = ClassSelection::from_logits(first.view(), None)
            .map_err(|e| AppError::InternalError(e.to_string()))?
            .top_index();
        let selection = ClassSelection::from_logits(first, Some(top))
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        let explanation = explain_image(
            bundle.model.as_ref(),
            &prepared.tensor,
            bundle.device,
            bundle.target_layer.as_deref(),
            Some(selection.index),
        )?;
        let overlay = imaging::render_overlay(&prepared.original, explanation.heatmap.view())?;

        Ok(Inference {
            selection,
            method: explanation.method,
            overlay: imaging::encode_png_data_uri(&overlay)?,
        })
    })
    .await??;

    let selection = &inference.selection;
    let names = bundle.class_names(selection.probabilities.len());
    let probs: Map<String, Value> = names
        .iter()
        .zip(&selection.probabilities)
        .map(|(name, &p)| (name.clone(), json!(f64::from(p))))
        .collect();
    let top_class = names
        .get(selection.index)
        .cloned()
        .unwrap_or_else(|| selection.index.to_string());
    let top_prob = f64::from(selection.probability);

    PredictionLog::create(
        &state.pool,
        NewPredictionLog {
            user_id: None,
            patient_id: None,
            model_id: query.model_id.clone(),
            inputs: json!({ "filename": filename }),
            outputs: json!({
                "top_class": top_class,
                "top_prob": top_prob,
                "probs": probs,
                "explanation": inference.method,
            }),
        },
    )
    .await?;

    tracing::info!(
        "Image prediction: model={} top_class={} top_prob={:.4} explanation={}",
        query.model_id,
        top_class,
        top_prob,
        inference.method.name()
    );

    Ok(Json(ImageResponse {
        top_class,
        top_prob,
        probs,
        explanation_b64: inference.overlay,
    }))
}
