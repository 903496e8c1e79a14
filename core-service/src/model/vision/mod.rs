//! Vision models
//!
//! [`VisionModel`] is the uniform dispatch interface for image classifiers.
//! Native networks expose their layers (and therefore Grad-CAM); ONNX graphs
//! are opaque and only offer an input gradient.

mod class;
mod gradient;
mod layers;
mod network;

#[cfg(test)]
pub(crate) mod testing;

use ndarray::{Array2, Array4};

use crate::error::{ExplainError, ModelError};

pub use class::ClassSelection;
pub use gradient::{finite_difference_gradient, FiniteDifference};
pub use layers::{ChannelAffine, Conv2d, Layer, LayerSpec, Linear};
pub use network::{NamedLayer, NativeNetwork, NetworkSpec};
pub(crate) use network::Probe;

/// Trait for image classifiers
pub trait VisionModel: Send + Sync {
    /// Logits for an `NCHW` batch, shape `[N, classes]`.
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, ModelError>;

    /// Gradient of the selected class score w.r.t. the input.
    ///
    /// The default estimates it by finite differences, which works for any
    /// model that can run a forward pass.
    fn score_gradient(
        &self,
        input: &Array4<f32>,
        class_index: Option<usize>,
    ) -> Result<(ClassSelection, Array4<f32>), ExplainError> {
        finite_difference_gradient(self, input, class_index, &FiniteDifference::default())
    }

    /// Layer-level access for models that expose their structure.
    fn layers(&self) -> Option<&NativeNetwork> {
        None
    }
}
