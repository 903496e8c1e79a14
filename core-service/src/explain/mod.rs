//! Explain Module - visual explanations for image predictions
//!
//! Grad-CAM on native networks, input-gradient saliency for everything else.

mod context;
mod engine;
mod gradcam;
mod heatmap;
mod saliency;
mod types;

pub use context::ExplanationContext;
pub use engine::explain_image;
pub use gradcam::grad_cam;
pub use heatmap::{min_max_normalize, upsample_bilinear};
pub use saliency::input_saliency;
pub use types::{ExplainMethod, Explanation};
