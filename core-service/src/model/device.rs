//! Compute device selection

use std::fmt;

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::{Deserialize, Serialize};

/// Device an image model runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    /// CUDA when ONNX Runtime can use it, CPU otherwise.
    pub fn resolve() -> Self {
        match CUDAExecutionProvider::default().is_available() {
            Ok(true) => Device::Cuda,
            Ok(false) => Device::Cpu,
            Err(e) => {
                log::debug!("CUDA availability check failed ({}), using CPU", e);
                Device::Cpu
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
