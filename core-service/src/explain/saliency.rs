//! Input-gradient saliency, the fallback for every model

use ndarray::{Array2, Array4, Axis};

use super::heatmap::min_max_normalize;
use crate::error::ExplainError;
use crate::model::vision::{ClassSelection, VisionModel};

/// Per-pixel max |d score / d input| across channels, min-max normalized.
pub fn input_saliency(
    model: &dyn VisionModel,
    input: &Array4<f32>,
    class_index: Option<usize>,
) -> Result<(ClassSelection, Array2<f32>), ExplainError> {
    let (selection, grad) = model.score_gradient(input, class_index)?;
    let map = grad
        .index_axis(Axis(0), 0)
        .fold_axis(Axis(0), 0.0f32, |acc, v| acc.max(v.abs()));
    Ok((selection, min_max_normalize(map)?))
}
