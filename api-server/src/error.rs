//! Error handling

use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use healthai_core::{ExplainError, ImagingError, ModelError, RegistryError};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    // Client errors
    ValidationError(String),

    // Explanation pipeline exhausted every strategy
    ExplanationFailed(String),

    // Database errors
    DatabaseError(String),

    // Generic errors
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::ExplanationFailed(msg) => {
                tracing::error!("Explanation failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Explanation failed")
            }
            AppError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred")
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownModel(_) | RegistryError::ModalityMismatch { .. } => {
                AppError::ValidationError(err.to_string())
            }
            RegistryError::Load { .. } => AppError::InternalError(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(format!("Invalid request: {}", err))
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::ValidationError(format!("Invalid request body: {}", err.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self {
        AppError::ValidationError(format!("Invalid query: {}", err.body_text()))
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::ValidationError(format!("Invalid upload: {}", err.body_text()))
    }
}

impl From<ImagingError> for AppError {
    fn from(err: ImagingError) -> Self {
        match err {
            ImagingError::Decode(_) => AppError::ValidationError(err.to_string()),
            _ => AppError::InternalError(err.to_string()),
        }
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<ExplainError> for AppError {
    fn from(err: ExplainError) -> Self {
        AppError::ExplanationFailed(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::InternalError(format!("Worker task failed: {}", err))
    }
}
