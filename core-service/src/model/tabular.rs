//! Tabular models
//!
//! A tabular model maps rows of feature values (in the model's column order)
//! to positive-class probabilities. Missing values travel as `NaN`.

use std::path::Path;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ModelError;

/// Trait for tabular prediction pipelines (native, ONNX, test fakes)
pub trait TabularModel: Send + Sync {
    /// Positive-class probability for every row of `rows` (`[n, features]`).
    fn predict_proba(&self, rows: ArrayView2<f64>) -> Result<Array1<f64>, ModelError>;

    /// Feature order embedded in the artifact, if it carries one.
    fn feature_columns(&self) -> Option<&[String]> {
        None
    }

    /// Reference row standing in for "feature unknown" during attribution.
    fn background(&self) -> Option<Array1<f64>> {
        None
    }
}

/// Standardization step (`(x - mean) / scale`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Impute → scale → logistic regression, stored as JSON.
///
/// ```json
/// {
///   "feature_columns": ["hba1c_first", "glucose_first"],
///   "impute": [5.6, 104.0],
///   "scaler": { "mean": [5.5, 100.0], "scale": [1.0, 20.0] },
///   "coefficients": [0.8, 0.5],
///   "intercept": -0.5
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticPipeline {
    #[serde(default)]
    pub feature_columns: Vec<String>,

    /// Per-column fill value for missing inputs
    #[serde(default)]
    pub impute: Option<Vec<f64>>,

    #[serde(default)]
    pub scaler: Option<StandardScaler>,

    pub coefficients: Vec<f64>,

    #[serde(default)]
    pub intercept: f64,
}

impl LogisticPipeline {
    /// Parse and validate a pipeline artifact
    pub fn from_slice(bytes: &[u8], path: &Path) -> Result<Self, ModelError> {
        let pipeline: Self = serde_json::from_slice(bytes).map_err(|e| ModelError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        pipeline.validate().map_err(|reason| ModelError::Malformed {
            path: path.display().to_string(),
            reason,
        })?;

        Ok(pipeline)
    }

    pub fn validate(&self) -> Result<(), String> {
        let n = self.coefficients.len();
        if n == 0 {
            return Err("pipeline has no coefficients".to_string());
        }
        if !self.feature_columns.is_empty() && self.feature_columns.len() != n {
            return Err(format!(
                "{} feature columns for {} coefficients",
                self.feature_columns.len(),
                n
            ));
        }
        if let Some(impute) = &self.impute {
            if impute.len() != n {
                return Err(format!("{} impute values for {} coefficients", impute.len(), n));
            }
        }
        if let Some(scaler) = &self.scaler {
            if scaler.mean.len() != n || scaler.scale.len() != n {
                return Err("scaler length does not match coefficients".to_string());
            }
            if scaler.scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
                return Err("scaler has a zero or non-finite scale".to_string());
            }
        }
        let all_finite = self.coefficients.iter().all(|c| c.is_finite()) && self.intercept.is_finite();
        if !all_finite {
            return Err("non-finite coefficients".to_string());
        }
        Ok(())
    }

    /// Fill value for a missing column: imputer, then scaler mean, then 0.
    fn fill_value(&self, column: usize) -> f64 {
        if let Some(impute) = &self.impute {
            return impute[column];
        }
        if let Some(scaler) = &self.scaler {
            return scaler.mean[column];
        }
        0.0
    }

    fn logit(&self, row: ArrayView1<f64>) -> f64 {
        let mut z = self.intercept;
        for (j, &coef) in self.coefficients.iter().enumerate() {
            let mut x = row[j];
            if x.is_nan() {
                x = self.fill_value(j);
            }
            if let Some(scaler) = &self.scaler {
                x = (x - scaler.mean[j]) / scaler.scale[j];
            }
            z += coef * x;
        }
        z
    }
}

impl TabularModel for LogisticPipeline {
    fn predict_proba(&self, rows: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if rows.ncols() != self.coefficients.len() {
            return Err(ModelError::shape(format!(
                "expected {} features, got {}",
                self.coefficients.len(),
                rows.ncols()
            )));
        }

        let proba: Array1<f64> = rows
            .outer_iter()
            .map(|row| sigmoid(self.logit(row)))
            .collect();

        if proba.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        Ok(proba)
    }

    fn feature_columns(&self) -> Option<&[String]> {
        if self.feature_columns.is_empty() {
            None
        } else {
            Some(&self.feature_columns)
        }
    }

    fn background(&self) -> Option<Array1<f64>> {
        Some((0..self.coefficients.len()).map(|j| self.fill_value(j)).collect())
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Numeric value of a caller-supplied feature; anything non-numeric is missing.
pub fn feature_value(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Arrange a feature mapping in model column order, `NaN` for absent columns.
pub fn align_row(features: &Map<String, Value>, columns: &[String]) -> Array1<f64> {
    columns
        .iter()
        .map(|col| features.get(col).map(feature_value).unwrap_or(f64::NAN))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    fn pipeline() -> LogisticPipeline {
        LogisticPipeline {
            feature_columns: vec!["hba1c_first".into(), "glucose_first".into()],
            impute: Some(vec![5.5, 100.0]),
            scaler: Some(StandardScaler {
                mean: vec![5.5, 100.0],
                scale: vec![1.0, 20.0],
            }),
            coefficients: vec![0.8, 0.5],
            intercept: -0.5,
        }
    }

    #[test]
    fn test_predict_known_value() {
        let p = pipeline();
        let rows = array![[6.4, 125.0]];
        let proba = p.predict_proba(rows.view()).unwrap();

        let z: f64 = -0.5 + 0.8 * 0.9 + 0.5 * 1.25;
        assert!((proba[0] - 1.0 / (1.0 + (-z).exp())).abs() < 1e-12);
    }

    #[test]
    fn test_missing_values_are_imputed() {
        let p = pipeline();
        let rows = array![[f64::NAN, f64::NAN]];
        let proba = p.predict_proba(rows.view()).unwrap();

        // imputed to the scaler mean, so only the intercept remains
        assert!((proba[0] - sigmoid(-0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_width_is_rejected() {
        let p = pipeline();
        let rows = array![[1.0, 2.0, 3.0]];
        assert!(matches!(p.predict_proba(rows.view()), Err(ModelError::Shape(_))));
    }

    #[test]
    fn test_validate_catches_inconsistent_lengths() {
        let mut p = pipeline();
        p.impute = Some(vec![1.0]);
        assert!(p.validate().is_err());

        let mut p = pipeline();
        p.scaler.as_mut().unwrap().scale[1] = 0.0;
        assert!(p.validate().is_err());

        let mut p = pipeline();
        p.feature_columns.pop();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_from_slice_parses_json() {
        let bytes = serde_json::to_vec(&pipeline()).unwrap();
        let parsed = LogisticPipeline::from_slice(&bytes, Path::new("t2d.json")).unwrap();
        assert_eq!(parsed, pipeline());

        let err = LogisticPipeline::from_slice(b"{\"coefficients\": []}", Path::new("bad.json"));
        assert!(matches!(err, Err(ModelError::Malformed { .. })));
    }

    #[test]
    fn test_align_row_fills_missing_with_nan() {
        let features = json!({
            "glucose_first": 125,
            "hba1c_first": "6.4",
            "unused": 1.0,
        });
        let cols = vec![
            "hba1c_first".to_string(),
            "glucose_first".to_string(),
            "chol_total_first".to_string(),
        ];
        let row = align_row(features.as_object().unwrap(), &cols);

        assert_eq!(row.len(), 3);
        assert_eq!(row[0], 6.4);
        assert_eq!(row[1], 125.0);
        assert!(row[2].is_nan());
    }

    #[test]
    fn test_feature_value_conversions() {
        assert_eq!(feature_value(&json!(2.5)), 2.5);
        assert_eq!(feature_value(&json!(true)), 1.0);
        assert_eq!(feature_value(&json!(false)), 0.0);
        assert!(feature_value(&json!(null)).is_nan());
        assert!(feature_value(&json!("n/a")).is_nan());
        assert!(feature_value(&json!([1, 2])).is_nan());
    }

    #[test]
    fn test_background_prefers_imputer() {
        let p = pipeline();
        assert_eq!(p.background().unwrap().to_vec(), vec![5.5, 100.0]);

        let bare = LogisticPipeline {
            feature_columns: vec![],
            impute: None,
            scaler: None,
            coefficients: vec![1.0, 1.0],
            intercept: 0.0,
        };
        assert_eq!(bare.background().unwrap().to_vec(), vec![0.0, 0.0]);
        assert!(bare.feature_columns().is_none());
    }
}
