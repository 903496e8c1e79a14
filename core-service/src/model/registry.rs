//! Model registry
//!
//! Maps fixed model identifiers to loaded bundles. Built once at startup by
//! scanning the models directory (or from in-memory bundles in tests), then
//! shared read-only behind an `Arc`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::device::Device;
use super::onnx::{OnnxTabularModel, OnnxVisionModel};
use super::tabular::{LogisticPipeline, TabularModel};
use super::vision::{NativeNetwork, VisionModel};
use super::ModelKind;
use crate::error::{ModelError, RegistryError};

/// Input resolution for ONNX image graphs (native artifacts carry their own)
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Known artifacts: (model id, kind, file stem)
const KNOWN_ARTIFACTS: &[(&str, ModelKind, &str)] = &[
    ("mimic_t2d", ModelKind::Tabular, "t2d_lab_model"),
    ("nhanes", ModelKind::Tabular, "nhanes"),
    ("dfu", ModelKind::Image, "dfu-2"),
    ("dr", ModelKind::Image, "dr"),
];

fn image_labels(id: &str) -> Option<Vec<String>> {
    let labels: &[&str] = match id {
        "dfu" => &["Healthy skin", "Ulcer", "Wounds"],
        "dr" => &["Mild", "Moderate", "No_DR", "Proliferate_DR", "Severe"],
        _ => return None,
    };
    Some(labels.iter().map(|s| s.to_string()).collect())
}

/// How a model artifact is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    Native,
    Onnx,
    InMemory,
}

/// Provenance of a loaded model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub kind: ModelKind,
    pub format: ModelFormat,
    pub artifact: Option<String>,
    /// Hex SHA-256 of the artifact bytes
    pub digest: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

impl ModelInfo {
    pub fn in_memory(id: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            id: id.into(),
            kind,
            format: ModelFormat::InMemory,
            artifact: None,
            digest: None,
            loaded_at: Utc::now(),
        }
    }

    fn from_artifact(id: &str, kind: ModelKind, format: ModelFormat, path: &Path, bytes: &[u8]) -> Self {
        Self {
            id: id.to_string(),
            kind,
            format,
            artifact: Some(path.display().to_string()),
            digest: Some(hex::encode(Sha256::digest(bytes))),
            loaded_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct TabularBundle {
    pub model: Arc<dyn TabularModel>,
    pub feature_columns: Vec<String>,
    pub info: ModelInfo,
}

#[derive(Clone)]
pub struct ImageBundle {
    pub model: Arc<dyn VisionModel>,
    pub device: Device,
    pub labels: Option<Vec<String>>,
    pub input_size: u32,
    /// Layer Grad-CAM tries first
    pub target_layer: Option<String>,
    pub info: ModelInfo,
}

impl ImageBundle {
    /// Display names for a `classes`-way output.
    ///
    /// The label table only applies when it has exactly one entry per class;
    /// otherwise every class is named by its index.
    pub fn class_names(&self, classes: usize) -> Vec<String> {
        match &self.labels {
            Some(labels) if labels.len() == classes => labels.clone(),
            _ => (0..classes).map(|i| i.to_string()).collect(),
        }
    }
}

impl std::fmt::Debug for TabularBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabularBundle")
            .field("feature_columns", &self.feature_columns)
            .field("info", &self.info)
            .finish()
    }
}

impl std::fmt::Debug for ImageBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBundle")
            .field("device", &self.device)
            .field("labels", &self.labels)
            .field("input_size", &self.input_size)
            .field("target_layer", &self.target_layer)
            .field("info", &self.info)
            .finish()
    }
}

#[derive(Clone)]
pub enum ModelBundle {
    Tabular(TabularBundle),
    Image(ImageBundle),
}

impl ModelBundle {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Tabular(_) => ModelKind::Tabular,
            Self::Image(_) => ModelKind::Image,
        }
    }

    pub fn info(&self) -> &ModelInfo {
        match self {
            Self::Tabular(b) => &b.info,
            Self::Image(b) => &b.info,
        }
    }
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("kind", &self.kind())
            .field("info", self.info())
            .finish()
    }
}

/// Settings applied while loading artifacts
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Patch side for finite-difference gradients of ONNX image models
    pub saliency_patch: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { saliency_patch: 16 }
    }
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    bundles: BTreeMap<String, ModelBundle>,
}

impl ModelRegistry {
    pub fn from_bundles<I, S>(bundles: I) -> Self
    where
        I: IntoIterator<Item = (S, ModelBundle)>,
        S: Into<String>,
    {
        Self {
            bundles: bundles.into_iter().map(|(id, b)| (id.into(), b)).collect(),
        }
    }

    /// Load every known artifact present in `dir`.
    ///
    /// Missing files are skipped; a file that exists but cannot be loaded is
    /// an error.
    pub fn load_all(dir: &Path, options: &LoadOptions) -> Result<Self, RegistryError> {
        let mut bundles = BTreeMap::new();
        let mut device = None;

        if !dir.is_dir() {
            log::warn!("Models directory {} not found, registry is empty", dir.display());
            return Ok(Self { bundles });
        }

        for &(id, kind, stem) in KNOWN_ARTIFACTS {
            let loaded = match kind {
                ModelKind::Tabular => load_tabular(id, dir, stem),
                ModelKind::Image => load_image(id, dir, stem, options, &mut device),
            }
            .map_err(|source| RegistryError::Load {
                id: id.to_string(),
                source,
            })?;

            match loaded {
                Some(bundle) => {
                    log::info!(
                        "Loaded {} model '{}' from {}",
                        kind,
                        id,
                        bundle.info().artifact.as_deref().unwrap_or("<memory>")
                    );
                    bundles.insert(id.to_string(), bundle);
                }
                None => log::warn!("No artifact for '{}' ({}.*) in {}", id, stem, dir.display()),
            }
        }

        Ok(Self { bundles })
    }

    pub fn get(&self, id: &str) -> Option<&ModelBundle> {
        self.bundles.get(id)
    }

    pub fn tabular(&self, id: &str) -> Result<&TabularBundle, RegistryError> {
        match self.bundles.get(id) {
            Some(ModelBundle::Tabular(b)) => Ok(b),
            Some(other) => Err(RegistryError::ModalityMismatch {
                id: id.to_string(),
                expected: ModelKind::Tabular,
                actual: other.kind(),
            }),
            None => Err(RegistryError::UnknownModel(id.to_string())),
        }
    }

    pub fn image(&self, id: &str) -> Result<&ImageBundle, RegistryError> {
        match self.bundles.get(id) {
            Some(ModelBundle::Image(b)) => Ok(b),
            Some(other) => Err(RegistryError::ModalityMismatch {
                id: id.to_string(),
                expected: ModelKind::Image,
                actual: other.kind(),
            }),
            None => Err(RegistryError::UnknownModel(id.to_string())),
        }
    }

    /// Sorted model identifiers
    pub fn ids(&self) -> Vec<String> {
        self.bundles.keys().cloned().collect()
    }

    pub fn kinds(&self) -> Vec<(String, ModelKind)> {
        self.bundles.iter().map(|(id, b)| (id.clone(), b.kind())).collect()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelBundle)> {
        self.bundles.iter().map(|(id, b)| (id.as_str(), b))
    }
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, ModelError> {
    fs::read(path).map_err(|source| ModelError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn existing(dir: &Path, stem: &str, ext: &str) -> Option<PathBuf> {
    let path = dir.join(format!("{}.{}", stem, ext));
    path.is_file().then_some(path)
}

/// Column order from `<stem>.cols.json`, if present
fn side_car_columns(dir: &Path, stem: &str) -> Result<Option<Vec<String>>, ModelError> {
    let Some(path) = existing(dir, stem, "cols.json") else {
        return Ok(None);
    };
    let bytes = read_artifact(&path)?;
    let columns = serde_json::from_slice(&bytes).map_err(|e| ModelError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(columns))
}

fn load_tabular(id: &str, dir: &Path, stem: &str) -> Result<Option<ModelBundle>, ModelError> {
    let side_car = side_car_columns(dir, stem)?;

    let (model, info): (Arc<dyn TabularModel>, ModelInfo) =
        if let Some(path) = existing(dir, stem, "json") {
            let bytes = read_artifact(&path)?;
            let pipeline = LogisticPipeline::from_slice(&bytes, &path)?;
            let info = ModelInfo::from_artifact(id, ModelKind::Tabular, ModelFormat::Native, &path, &bytes);
            (Arc::new(pipeline), info)
        } else if let Some(path) = existing(dir, stem, "onnx") {
            let bytes = read_artifact(&path)?;
            let model = OnnxTabularModel::from_bytes(&bytes, side_car.clone())?;
            let info = ModelInfo::from_artifact(id, ModelKind::Tabular, ModelFormat::Onnx, &path, &bytes);
            (Arc::new(model), info)
        } else {
            return Ok(None);
        };

    let feature_columns = model
        .feature_columns()
        .map(<[String]>::to_vec)
        .or(side_car)
        .unwrap_or_default();
    if feature_columns.is_empty() {
        log::warn!("Model '{}' has no feature columns, every feature will be missing", id);
    }

    Ok(Some(ModelBundle::Tabular(TabularBundle {
        model,
        feature_columns,
        info,
    })))
}

fn load_image(
    id: &str,
    dir: &Path,
    stem: &str,
    options: &LoadOptions,
    device: &mut Option<Device>,
) -> Result<Option<ModelBundle>, ModelError> {
    let labels = image_labels(id);

    if let Some(path) = existing(dir, stem, "onnx") {
        let device = *device.get_or_insert_with(|| {
            let resolved = Device::resolve();
            log::info!("Image models will run on {}", resolved);
            resolved
        });
        let bytes = read_artifact(&path)?;
        let model = OnnxVisionModel::from_bytes(&bytes, device, options.saliency_patch)?;
        return Ok(Some(ModelBundle::Image(ImageBundle {
            model: Arc::new(model),
            device,
            labels,
            input_size: DEFAULT_IMAGE_SIZE,
            target_layer: None,
            info: ModelInfo::from_artifact(id, ModelKind::Image, ModelFormat::Onnx, &path, &bytes),
        })));
    }

    if let Some(path) = existing(dir, stem, "json") {
        let bytes = read_artifact(&path)?;
        let (network, input_size, target_layer) = NativeNetwork::from_slice(&bytes, &path)?;
        return Ok(Some(ModelBundle::Image(ImageBundle {
            model: Arc::new(network),
            device: Device::Cpu,
            labels,
            input_size,
            target_layer,
            info: ModelInfo::from_artifact(id, ModelKind::Image, ModelFormat::Native, &path, &bytes),
        })));
    }

    Ok(None)
}
