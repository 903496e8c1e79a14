//! Finite-difference input gradients for models without a backward pass

use ndarray::{s, Array4};

use super::class::ClassSelection;
use super::VisionModel;
use crate::error::ExplainError;

/// Patch-wise forward-difference settings
#[derive(Debug, Clone, Copy)]
pub struct FiniteDifference {
    /// Side of the square pixel block perturbed together
    pub patch: usize,
    /// Additive perturbation in normalized input units
    pub step: f32,
}

impl Default for FiniteDifference {
    fn default() -> Self {
        Self {
            patch: 16,
            step: 1e-2,
        }
    }
}

/// Estimate d(score)/d(input) one patch and channel at a time.
///
/// Every pixel of a patch receives the patch's mean gradient, so the result
/// has the input's shape at patch resolution. Only the first batch item is
/// perturbed.
pub fn finite_difference_gradient<M: VisionModel + ?Sized>(
    model: &M,
    input: &Array4<f32>,
    class_index: Option<usize>,
    settings: &FiniteDifference,
) -> Result<(ClassSelection, Array4<f32>), ExplainError> {
    let logits = model.forward(input)?;
    let first = logits.outer_iter().next().ok_or(ExplainError::EmptyOutput)?;
    let selection = ClassSelection::from_logits(first, class_index)?;
    let base = selection.score(first);

    let (_, channels, height, width) = input.dim();
    let patch = settings.patch.max(1);
    let step = settings.step;

    let mut grad = Array4::zeros(input.raw_dim());
    let mut probe = input.clone();

    for c in 0..channels {
        for y0 in (0..height).step_by(patch) {
            let y1 = (y0 + patch).min(height);
            for x0 in (0..width).step_by(patch) {
                let x1 = (x0 + patch).min(width);
                let area = ((y1 - y0) * (x1 - x0)) as f32;

                probe
                    .slice_mut(s![0, c, y0..y1, x0..x1])
                    .mapv_inplace(|v| v + step);
                let logits = model.forward(&probe)?;
                let row = logits.outer_iter().next().ok_or(ExplainError::EmptyOutput)?;
                let delta = (selection.score(row) - base) / step;
                probe
                    .slice_mut(s![0, c, y0..y1, x0..x1])
                    .assign(&input.slice(s![0, c, y0..y1, x0..x1]));

                grad.slice_mut(s![0, c, y0..y1, x0..x1]).fill(delta / area);
            }
        }
    }

    if grad.iter().any(|v| !v.is_finite()) {
        return Err(ExplainError::NonFinite);
    }
    Ok((selection, grad))
}
