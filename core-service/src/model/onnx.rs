//! ONNX Runtime backed models
//!
//! Graphs are loaded from memory so the registry can hash the same bytes it
//! hands to the runtime. `Session::run` needs exclusive access, so each
//! session sits behind a mutex; inference requests on one model serialize.

use ndarray::{Array1, Array2, Array4, ArrayD, ArrayView2, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::{Value, ValueType};
use parking_lot::Mutex;

use super::device::Device;
use super::tabular::TabularModel;
use super::vision::{finite_difference_gradient, ClassSelection, FiniteDifference, VisionModel};
use crate::error::{ExplainError, ModelError};

/// Output names converted sklearn classifiers use for class probabilities
const PROBABILITY_OUTPUTS: &[&str] = &["output_probability", "probabilities"];

/// Choose the output to read from `(name, is_f32_tensor)` pairs.
///
/// The first preferred name that is a float tensor wins, then the first float
/// tensor in graph order. Label outputs (int64) and ZipMap sequences are never
/// picked.
fn pick_output<'a, I>(outputs: I, preferred: &[&str]) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, bool)>,
{
    let floats: Vec<&str> = outputs
        .into_iter()
        .filter(|(_, is_f32)| *is_f32)
        .map(|(name, _)| name)
        .collect();

    preferred
        .iter()
        .find_map(|want| floats.iter().copied().find(|name| name == want))
        .or_else(|| floats.first().copied())
}

/// A committed session plus the output it reads
pub struct OnnxSession {
    session: Mutex<Session>,
    output_name: String,
}

impl OnnxSession {
    /// Build a session from raw model bytes.
    ///
    /// Reads the first of `preferred_outputs` the graph declares as a float
    /// tensor, otherwise its first float tensor output.
    pub fn from_bytes(
        bytes: &[u8],
        device: Device,
        preferred_outputs: &[&str],
    ) -> Result<Self, ModelError> {
        let mut builder = Session::builder()
            .map_err(|e| ModelError::Runtime(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelError::Runtime(format!("Failed to set optimization: {}", e)))?;

        if device == Device::Cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(|e| ModelError::Runtime(format!("Failed to register CUDA: {}", e)))?;
        }

        let session = builder
            .commit_from_memory(bytes)
            .map_err(|e| ModelError::Runtime(format!("Failed to load model: {}", e)))?;

        let candidates = session.outputs.iter().map(|o| {
            let is_f32 = matches!(
                o.output_type,
                ValueType::Tensor { ty: TensorElementType::Float32, .. }
            );
            (o.name.as_str(), is_f32)
        });
        let output_name = pick_output(candidates, preferred_outputs)
            .map(str::to_string)
            .ok_or_else(|| ModelError::Runtime("No float tensor output defined".to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Run a single-input graph; returns the output shape and flat data.
    pub fn run_f32(&self, input: ArrayD<f32>) -> Result<(Vec<usize>, Vec<f32>), ModelError> {
        let tensor = Value::from_array(input)
            .map_err(|e| ModelError::Runtime(format!("Tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ModelError::Runtime(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| ModelError::Runtime(format!("No output '{}'", self.output_name)))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Runtime(format!("Extract error: {}", e)))?;

        let dims = shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, data.to_vec()))
    }
}

impl std::fmt::Debug for OnnxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSession")
            .field("output_name", &self.output_name)
            .finish()
    }
}

/// Tabular classifier exported to ONNX, inputs as `float32[N, features]`
#[derive(Debug)]
pub struct OnnxTabularModel {
    session: OnnxSession,
    feature_columns: Option<Vec<String>>,
}

impl OnnxTabularModel {
    pub fn from_bytes(bytes: &[u8], feature_columns: Option<Vec<String>>) -> Result<Self, ModelError> {
        let session = OnnxSession::from_bytes(bytes, Device::Cpu, PROBABILITY_OUTPUTS)?;
        Ok(Self {
            session,
            feature_columns,
        })
    }
}

impl TabularModel for OnnxTabularModel {
    fn predict_proba(&self, rows: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let n = rows.nrows();
        let input = rows.mapv(|v| v as f32).into_dyn();
        let (shape, data) = self.session.run_f32(input)?;

        let probs: Vec<f64> = match shape.as_slice() {
            [rows_out, 2] if *rows_out == n => data.chunks(2).map(|c| c[1] as f64).collect(),
            [rows_out, 1] if *rows_out == n => data.iter().map(|&v| v as f64).collect(),
            [rows_out] if *rows_out == n => data.iter().map(|&v| v as f64).collect(),
            other => {
                return Err(ModelError::shape(format!(
                    "expected positive-class probabilities for {} rows, got output shape {:?}",
                    n, other
                )))
            }
        };

        if probs.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        Ok(Array1::from(probs))
    }

    fn feature_columns(&self) -> Option<&[String]> {
        self.feature_columns.as_deref()
    }
}

/// Image classifier exported to ONNX, inputs as `float32[N, 3, H, W]`
///
/// The graph is opaque: no layer activations, and input gradients come from
/// finite differences.
#[derive(Debug)]
pub struct OnnxVisionModel {
    session: OnnxSession,
    gradient: FiniteDifference,
}

impl OnnxVisionModel {
    pub fn from_bytes(bytes: &[u8], device: Device, patch: usize) -> Result<Self, ModelError> {
        let session = OnnxSession::from_bytes(bytes, device, &[])?;
        Ok(Self {
            session,
            gradient: FiniteDifference {
                patch,
                ..FiniteDifference::default()
            },
        })
    }
}

impl VisionModel for OnnxVisionModel {
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        let batch = input.dim().0;
        let (shape, data) = self.session.run_f32(input.clone().into_dyn())?;

        let classes = match shape.as_slice() {
            [b, c] if *b == batch => *c,
            [b] if *b == batch => 1,
            other => {
                return Err(ModelError::shape(format!(
                    "expected logits [{}, classes], got {:?}",
                    batch, other
                )))
            }
        };

        let logits = ArrayD::from_shape_vec(IxDyn(&[batch, classes]), data)
            .map_err(|e| ModelError::shape(e.to_string()))?
            .into_dimensionality()
            .map_err(|e| ModelError::shape(e.to_string()))?;
        Ok(logits)
    }

    fn score_gradient(
        &self,
        input: &Array4<f32>,
        class_index: Option<usize>,
    ) -> Result<(ClassSelection, Array4<f32>), ExplainError> {
        finite_difference_gradient(self, input, class_index, &self.gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_a_runtime_error() {
        let err = OnnxTabularModel::from_bytes(b"not an onnx graph", None).unwrap_err();
        assert!(matches!(err, ModelError::Runtime(_)));

        let err = OnnxVisionModel::from_bytes(b"\x00\x01\x02", Device::Cpu, 16).unwrap_err();
        assert!(matches!(err, ModelError::Runtime(_)));
    }

    #[test]
    fn test_probability_output_preferred_over_label() {
        let outputs = [("output_label", false), ("output_probability", true)];
        assert_eq!(pick_output(outputs, PROBABILITY_OUTPUTS), Some("output_probability"));

        let legacy = [("label", false), ("probabilities", true)];
        assert_eq!(pick_output(legacy, PROBABILITY_OUTPUTS), Some("probabilities"));
    }

    #[test]
    fn test_falls_back_to_first_float_output() {
        let outputs = [("output_label", false), ("scores", true), ("extra", true)];
        assert_eq!(pick_output(outputs, PROBABILITY_OUTPUTS), Some("scores"));
        assert_eq!(pick_output([("logits", true)], &[]), Some("logits"));

        // ZipMap probabilities are a sequence of maps, not a tensor
        let zipmap = [("output_label", false), ("output_probability", false)];
        assert_eq!(pick_output(zipmap, PROBABILITY_OUTPUTS), None);
    }
}
