//! Health AI core engine
//!
//! Model registry, inference and explanation engines used by the API server.
//!
//! ```text
//!  models dir ──► ModelRegistry::load_all ──► ModelBundle
//!                                              ├── Tabular ──► predict_proba ──► attribution::explain_row
//!                                              └── Image ────► forward ───────► explain::explain_image
//!                                                                                   │
//!                                                              imaging::render_overlay ◄┘
//! ```

pub mod error;
pub mod model;
pub mod explain;
pub mod attribution;
pub mod imaging;

pub use error::{ExplainError, ImagingError, ModelError, RegistryError};
pub use model::{
    Device, ImageBundle, ModelBundle, ModelKind, ModelRegistry, RiskCategory, RiskThresholds,
    TabularBundle,
};
