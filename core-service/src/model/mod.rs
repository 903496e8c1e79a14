//! Model Module - registry and model families
//!
//! Tabular pipelines and vision networks live behind two traits
//! ([`TabularModel`], [`VisionModel`]) so the registry can hold native
//! artifacts, ONNX graphs and in-memory fakes side by side.

pub mod device;
pub mod onnx;
pub mod registry;
pub mod tabular;
pub mod threshold;
pub mod vision;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use device::Device;
pub use registry::{
    ImageBundle, LoadOptions, ModelBundle, ModelFormat, ModelInfo, ModelRegistry, TabularBundle,
};
pub use tabular::{align_row, feature_value, LogisticPipeline, StandardScaler, TabularModel};
pub use threshold::{RiskCategory, RiskThresholds, ThresholdError};
pub use vision::{ClassSelection, Layer, NamedLayer, NativeNetwork, VisionModel};

/// Input modality served by a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Tabular,
    Image,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tabular => "tabular",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
