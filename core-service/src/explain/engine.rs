use ndarray::Array4;

use super::gradcam::grad_cam;
use super::saliency::input_saliency;
use super::types::{ExplainMethod, Explanation};
use crate::error::ExplainError;
use crate::model::{Device, VisionModel};

/// Heatmap for `class_index` (or the top class).
///
/// Tries Grad-CAM at the preferred layer, then at the last convolution, and
/// falls back to input-gradient saliency. Opaque models go straight to the
/// fallback. Only a fallback failure is returned.
pub fn explain_image(
    model: &dyn VisionModel,
    input: &Array4<f32>,
    device: Device,
    preferred_layer: Option<&str>,
    class_index: Option<usize>,
) -> Result<Explanation, ExplainError> {
    log::debug!("Explaining {:?} input on {}", input.dim(), device);

    if let Some(network) = model.layers() {
        let preferred = preferred_layer.and_then(|name| {
            let found = network.find_layer(name);
            if found.is_none() {
                log::warn!("Grad-CAM layer '{}' not found in network", name);
            }
            found
        });

        let mut candidates = Vec::with_capacity(2);
        candidates.extend(preferred);
        if let Some(last) = network.last_conv_layer() {
            if preferred != Some(last) {
                candidates.push(last);
            }
        }

        for layer in candidates {
            let name = network.layer_name(layer).unwrap_or("?").to_string();
            match grad_cam(network, layer, input, class_index) {
                Ok((selection, heatmap)) => {
                    return Ok(Explanation {
                        class_index: selection.index,
                        probability: selection.probability,
                        heatmap,
                        probabilities: selection.probabilities,
                        method: ExplainMethod::GradCam { layer: name },
                    })
                }
                Err(e) => log::warn!("Grad-CAM at '{}' failed: {}", name, e),
            }
        }
    }

    let (selection, heatmap) = input_saliency(model, input, class_index)?;
    Ok(Explanation {
        class_index: selection.index,
        probability: selection.probability,
        heatmap,
        probabilities: selection.probabilities,
        method: ExplainMethod::InputGradient,
    })
}
