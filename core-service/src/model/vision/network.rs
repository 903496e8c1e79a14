//! Native layered network
//!
//! A sequential network of named layers, loaded from a JSON artifact. Unlike
//! an ONNX graph it exposes its layers, so activations and gradients can be
//! captured at any of them through the network's probe slot.

use std::path::Path;

use ndarray::{Array2, Array4, ArrayD, Ix2, Ix4};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::class::ClassSelection;
use super::layers::{Layer, LayerSpec};
use super::VisionModel;
use crate::error::{ExplainError, ModelError};

/// Default square input resolution
pub const DEFAULT_INPUT_SIZE: u32 = 224;

#[derive(Debug, Clone)]
pub struct NamedLayer {
    pub name: String,
    pub layer: Layer,
}

impl NamedLayer {
    pub fn new(name: impl Into<String>, layer: Layer) -> Self {
        Self {
            name: name.into(),
            layer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedLayerSpec {
    pub name: String,
    #[serde(flatten)]
    pub layer: LayerSpec,
}

/// Native network artifact
///
/// ```json
/// {
///   "input_size": 224,
///   "target_layer": "features.4",
///   "layers": [
///     { "name": "features.0", "type": "conv2d", "in_channels": 3, ... },
///     { "name": "features.1", "type": "relu" },
///     ...
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Layer Grad-CAM should try before the last convolution
    #[serde(default)]
    pub target_layer: Option<String>,

    pub layers: Vec<NamedLayerSpec>,
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

/// Capture slot filled during an instrumented forward/backward pass
#[derive(Debug, Default)]
pub(crate) struct Probe {
    pub(crate) target: Option<usize>,
    pub(crate) activation: Option<ArrayD<f32>>,
    pub(crate) gradient: Option<ArrayD<f32>>,
}

impl Probe {
    #[cfg(test)]
    pub(crate) fn is_attached(&self) -> bool {
        self.target.is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.target = None;
        self.activation = None;
        self.gradient = None;
    }
}

pub struct NativeNetwork {
    layers: Vec<NamedLayer>,
    pub(crate) probe: Mutex<Probe>,
}

impl NativeNetwork {
    pub fn new(layers: Vec<NamedLayer>) -> Self {
        Self {
            layers,
            probe: Mutex::new(Probe::default()),
        }
    }

    pub fn from_spec(spec: NetworkSpec) -> Result<Self, ModelError> {
        if spec.layers.is_empty() {
            return Err(ModelError::shape("network has no layers"));
        }
        let layers = spec
            .layers
            .into_iter()
            .map(|l| Layer::from_spec(l.layer).map(|layer| NamedLayer::new(l.name, layer)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(layers))
    }

    /// Parse a network artifact; also returns the artifact-level settings.
    pub fn from_slice(bytes: &[u8], path: &Path) -> Result<(Self, u32, Option<String>), ModelError> {
        let malformed = |reason: String| ModelError::Malformed {
            path: path.display().to_string(),
            reason,
        };
        let spec: NetworkSpec = serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
        if spec.input_size == 0 {
            return Err(malformed("input_size must be positive".to_string()));
        }
        let input_size = spec.input_size;
        let target_layer = spec.target_layer.clone();
        let network = Self::from_spec(spec).map_err(|e| malformed(e.to_string()))?;
        Ok((network, input_size, target_layer))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.name.as_str())
    }

    pub fn layer_name(&self, index: usize) -> Option<&str> {
        self.layers.get(index).map(|l| l.name.as_str())
    }

    pub fn find_layer(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    pub fn last_conv_layer(&self) -> Option<usize> {
        self.layers.iter().rposition(|l| l.layer.is_conv())
    }

    /// Forward pass keeping every layer input for the backward pass.
    pub(crate) fn forward_traced(
        &self,
        input: &Array4<f32>,
        mut probe: Option<&mut Probe>,
    ) -> Result<(Array2<f32>, Vec<ArrayD<f32>>), ModelError> {
        let mut tape = Vec::with_capacity(self.layers.len());
        let mut x = input.clone().into_dyn();

        for (i, named) in self.layers.iter().enumerate() {
            let y = named.layer.forward(&x)?;
            tape.push(x);
            if let Some(p) = probe.as_deref_mut() {
                if p.target == Some(i) {
                    p.activation = Some(y.clone());
                }
            }
            x = y;
        }

        let logits = x
            .into_dimensionality::<Ix2>()
            .map_err(|_| ModelError::shape("network output is not [batch, classes]"))?;
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        Ok((logits, tape))
    }

    /// Backward pass from `seed` (d score / d logits).
    ///
    /// With an attached probe the pass stops at the probed layer, storing the
    /// gradient of its output; otherwise it runs down to the input.
    pub(crate) fn backward(
        &self,
        tape: &[ArrayD<f32>],
        seed: ArrayD<f32>,
        mut probe: Option<&mut Probe>,
    ) -> Result<ArrayD<f32>, ModelError> {
        if tape.len() != self.layers.len() {
            return Err(ModelError::shape("backward tape does not match network"));
        }
        let mut grad = seed;
        for (i, named) in self.layers.iter().enumerate().rev() {
            if let Some(p) = probe.as_deref_mut() {
                if p.target == Some(i) {
                    p.gradient = Some(grad.clone());
                    return Ok(grad);
                }
            }
            grad = named.layer.backward(&tape[i], &grad)?;
        }
        Ok(grad)
    }
}

impl VisionModel for NativeNetwork {
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        self.forward_traced(input, None).map(|(logits, _)| logits)
    }

    fn score_gradient(
        &self,
        input: &Array4<f32>,
        class_index: Option<usize>,
    ) -> Result<(ClassSelection, Array4<f32>), ExplainError> {
        let (logits, tape) = self.forward_traced(input, None)?;
        let first = logits.outer_iter().next().ok_or(ExplainError::EmptyOutput)?;
        let selection = ClassSelection::from_logits(first, class_index)?;

        let seed = selection.seed_matrix(logits.nrows()).into_dyn();
        let grad = self
            .backward(&tape, seed, None)?
            .into_dimensionality::<Ix4>()
            .map_err(|_| ModelError::shape("input gradient is not 4-D"))?;
        Ok((selection, grad))
    }

    fn layers(&self) -> Option<&NativeNetwork> {
        Some(self)
    }
}

impl std::fmt::Debug for NativeNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeNetwork")
            .field(
                "layers",
                &self.layers.iter().map(|l| (l.name.as_str(), l.layer.kind())).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::vision::testing::{sample_input, tiny_cnn};

    fn input() -> Array4<f32> {
        sample_input(6)
    }

    #[test]
    fn test_forward_shape() {
        let net = tiny_cnn();
        let logits = VisionModel::forward(&net, &input()).unwrap();
        assert_eq!(logits.dim(), (1, 3));
    }

    #[test]
    fn test_layer_lookup() {
        let net = tiny_cnn();
        assert_eq!(net.find_layer("pool"), Some(2));
        assert_eq!(net.find_layer("missing"), None);
        assert_eq!(net.last_conv_layer(), Some(0));
        assert_eq!(net.layer_names().collect::<Vec<_>>().len(), 4);
    }

    #[test]
    fn test_backward_stops_at_probe() {
        let net = tiny_cnn();
        let mut probe = Probe {
            target: Some(0),
            ..Default::default()
        };
        let (logits, tape) = net.forward_traced(&input(), Some(&mut probe)).unwrap();
        let seed = Array2::from_shape_fn(logits.raw_dim(), |(_, j)| if j == 0 { 1.0 } else { 0.0 });
        net.backward(&tape, seed.into_dyn(), Some(&mut probe)).unwrap();

        assert_eq!(probe.activation.as_ref().unwrap().shape(), &[1, 2, 6, 6]);
        assert_eq!(probe.gradient.as_ref().unwrap().shape(), &[1, 2, 6, 6]);
    }

    #[test]
    fn test_score_gradient_matches_input_shape() {
        let net = tiny_cnn();
        let (selection, grad) = net.score_gradient(&input(), None).unwrap();
        assert_eq!(grad.dim(), (1, 3, 6, 6));
        assert!(selection.index < 3);
    }

    #[test]
    fn test_from_slice_reads_artifact_settings() {
        let json = serde_json::json!({
            "input_size": 32,
            "target_layer": "body",
            "layers": [
                { "name": "body", "type": "conv2d", "in_channels": 3, "out_channels": 1,
                  "kernel_size": 1, "weight": [1.0, 1.0, 1.0] },
                { "name": "pool", "type": "global_avg_pool" },
                { "name": "head", "type": "linear", "in_features": 1, "out_features": 2,
                  "weight": [1.0, -1.0] }
            ]
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let (net, size, target) = NativeNetwork::from_slice(&bytes, Path::new("dr.json")).unwrap();

        assert_eq!(size, 32);
        assert_eq!(target.as_deref(), Some("body"));
        assert_eq!(net.len(), 3);
        assert_eq!(net.last_conv_layer(), Some(0));
    }

    #[test]
    fn test_from_slice_rejects_bad_layers() {
        let json = br#"{"layers": [{"name": "fc", "type": "linear", "in_features": 2, "out_features": 2, "weight": [1.0]}]}"#;
        assert!(matches!(
            NativeNetwork::from_slice(json, Path::new("bad.json")),
            Err(ModelError::Malformed { .. })
        ));

        let empty = br#"{"layers": []}"#;
        assert!(NativeNetwork::from_slice(empty, Path::new("empty.json")).is_err());
    }

    #[test]
    fn test_from_slice_rejects_zero_input_size() {
        let json = br#"{"input_size": 0, "layers": [{"name": "pool", "type": "global_avg_pool"}]}"#;
        let err = NativeNetwork::from_slice(json, Path::new("dr.json")).unwrap_err();
        assert!(matches!(err, ModelError::Malformed { ref reason, .. } if reason.contains("input_size")));
    }
}
