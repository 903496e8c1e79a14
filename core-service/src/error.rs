//! Error types for the core engine

use thiserror::Error;

use crate::model::ModelKind;

/// Failures while loading or running a model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("ONNX Runtime error: {0}")]
    Runtime(String),

    #[error("model produced non-finite output")]
    NonFinite,
}

impl ModelError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        ModelError::Shape(msg.into())
    }
}

/// Registry lookup and load failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown model_id '{0}'")]
    UnknownModel(String),

    #[error("model_id '{id}' is a {actual} model, expected {expected}")]
    ModalityMismatch {
        id: String,
        expected: ModelKind,
        actual: ModelKind,
    },

    #[error("failed to load model '{id}': {source}")]
    Load {
        id: String,
        #[source]
        source: ModelError,
    },
}

/// Failures of a single explanation strategy
#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("model returned no logits")]
    EmptyOutput,

    #[error("class index {index} out of range for {classes} classes")]
    ClassOutOfRange { index: usize, classes: usize },

    #[error("layer '{0}' does not produce a spatial feature map")]
    NotSpatial(String),

    #[error("layer index {0} does not exist")]
    NoSuchLayer(usize),

    #[error("activation or gradient was not captured")]
    NotCaptured,

    #[error("explanation contains non-finite values")]
    NonFinite,

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Image decoding and rendering failures
#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("could not encode overlay: {0}")]
    Encode(#[source] image::ImageError),

    #[error("heatmap is empty")]
    EmptyHeatmap,
}
