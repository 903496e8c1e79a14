//! Configuration module

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use healthai_core::attribution::AttributionConfig;
use healthai_core::model::{LoadOptions, ThresholdError};
use healthai_core::RiskThresholds;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Thresholds(#[from] ThresholdError),

    #[error("ATTRIBUTION_SAMPLES must be at least 1")]
    ZeroSamples,

    #[error("SALIENCY_PATCH must be at least 1")]
    ZeroPatch,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Server port
    pub port: u16,

    /// Allowed CORS origins; `None` allows any
    pub cors_origins: Option<Vec<String>>,

    /// Directory scanned for model artifacts
    pub models_dir: PathBuf,

    pub thresholds: RiskThresholds,

    pub attribution: AttributionConfig,

    /// Patch side for finite-difference saliency on ONNX image models
    pub saliency_patch: usize,

    /// Default page size for admin listings
    pub admin_default_limit: u32,

    /// Request body cap (image uploads)
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://healthai.db".to_string(),
            port: 8000,
            cors_origins: None,
            models_dir: PathBuf::from("assets/models"),
            thresholds: RiskThresholds::default(),
            attribution: AttributionConfig::default(),
            saliency_patch: 16,
            admin_default_limit: 20,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = env::var("CORS_ORIGINS")
            .ok()
            .map(|v| parse_origins(&v))
            .unwrap_or(None);

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),

            port: env_parse("PORT", defaults.port),

            cors_origins,

            models_dir: env::var("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.models_dir),

            thresholds: RiskThresholds {
                low: env_parse("THRESH_LOW", defaults.thresholds.low),
                high: env_parse("THRESH_HIGH", defaults.thresholds.high),
            },

            attribution: AttributionConfig {
                samples: env_parse("ATTRIBUTION_SAMPLES", defaults.attribution.samples),
                seed: env_parse("ATTRIBUTION_SEED", defaults.attribution.seed),
                top_k: env_parse("ATTRIBUTION_TOP_K", defaults.attribution.top_k),
            },

            saliency_patch: env_parse("SALIENCY_PATCH", defaults.saliency_patch),

            admin_default_limit: env_parse("ADMIN_DEFAULT_LIMIT", defaults.admin_default_limit),

            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        if self.attribution.samples == 0 {
            return Err(ConfigError::ZeroSamples);
        }
        if self.saliency_patch == 0 {
            return Err(ConfigError::ZeroPatch);
        }
        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            saliency_patch: self.saliency_patch,
        }
    }
}

/// Parsed variable, or `default` when unset or unparsable
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// `*` or empty means any origin
fn parse_origins(raw: &str) -> Option<Vec<String>> {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect();

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        None
    } else {
        Some(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        assert_eq!(parse_origins("*"), None);
        assert_eq!(parse_origins(" "), None);
        assert_eq!(
            parse_origins("http://localhost:3000, https://app.example.com"),
            Some(vec![
                "http://localhost:3000".to_string(),
                "https://app.example.com".to_string()
            ])
        );
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.thresholds = RiskThresholds { low: 0.7, high: 0.6 };
        assert!(matches!(config.validate(), Err(ConfigError::Thresholds(_))));

        let mut config = Config::default();
        config.attribution.samples = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroSamples)));

        let mut config = Config::default();
        config.saliency_patch = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPatch)));
    }
}
