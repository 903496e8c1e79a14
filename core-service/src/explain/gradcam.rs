//! Grad-CAM over a native network layer

use ndarray::{Array2, Array4, Axis, Ix4};

use super::context::ExplanationContext;
use super::heatmap::{min_max_normalize, upsample_bilinear};
use crate::error::ExplainError;
use crate::model::vision::{ClassSelection, NativeNetwork};

/// Class activation map at `layer`, upsampled to the input resolution.
pub fn grad_cam(
    network: &NativeNetwork,
    layer: usize,
    input: &Array4<f32>,
    class_index: Option<usize>,
) -> Result<(ClassSelection, Array2<f32>), ExplainError> {
    let (selection, activation, gradient) = {
        let mut ctx = ExplanationContext::attach(network, layer)?;
        ctx.run(input, class_index)?
    };

    let not_spatial = || ExplainError::NotSpatial(network.layer_name(layer).unwrap_or("?").to_string());
    let activation = activation.into_dimensionality::<Ix4>().map_err(|_| not_spatial())?;
    let gradient = gradient.into_dimensionality::<Ix4>().map_err(|_| not_spatial())?;

    // First batch item: [C, h, w]
    let a = activation.index_axis(Axis(0), 0);
    let g = gradient.index_axis(Axis(0), 0);

    let weights = g
        .mean_axis(Axis(2))
        .and_then(|m| m.mean_axis(Axis(1)))
        .ok_or_else(not_spatial)?;

    let (_, h, w) = a.dim();
    let mut cam = Array2::<f32>::zeros((h, w));
    for (channel, weight) in a.outer_iter().zip(weights.iter()) {
        cam.scaled_add(*weight, &channel);
    }
    cam.mapv_inplace(|v| v.max(0.0));

    let (_, _, in_h, in_w) = input.dim();
    let heatmap = min_max_normalize(upsample_bilinear(cam.view(), in_h, in_w))?;
    Ok((selection, heatmap))
}
