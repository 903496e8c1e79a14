use ndarray::Array2;
use serde::Serialize;

/// Which strategy produced a heatmap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplainMethod {
    GradCam { layer: String },
    InputGradient,
}

impl ExplainMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GradCam { .. } => "grad_cam",
            Self::InputGradient => "input_gradient",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Explanation {
    pub class_index: usize,
    pub probability: f32,
    /// `[H, W]` at input resolution, values in `[0, 1]`
    pub heatmap: Array2<f32>,
    pub probabilities: Vec<f32>,
    pub method: ExplainMethod,
}
