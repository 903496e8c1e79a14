//! Attribution Module - per-feature contributions for tabular predictions
//!
//! Permutation-sampling Shapley values: walk a permutation of the features,
//! switching each one from its background value to the caller's value, and
//! credit it with the change in probability. Averaged over all permutations
//! when there are few enough features, over a seeded sample otherwise.

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::model::TabularModel;

/// Attribution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// Permutation budget
    pub samples: usize,
    pub seed: u64,
    /// Entries kept in responses
    pub top_k: usize,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            samples: 128,
            seed: 42,
            top_k: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAttribution {
    pub feature: String,
    pub value: f64,
}

/// Outcome of an attribution run; failures never propagate.
#[derive(Debug, Clone, PartialEq)]
pub enum Attributions {
    Computed(Vec<FeatureAttribution>),
    Unavailable { reason: String },
}

impl Attributions {
    fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Computed(_))
    }

    /// At most `k` entries, largest magnitude first.
    pub fn top_k(&self, k: usize) -> Vec<FeatureAttribution> {
        match self {
            Self::Computed(all) => {
                let mut sorted = all.clone();
                sorted.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
                sorted.truncate(k);
                sorted
            }
            Self::Unavailable { .. } => Vec::new(),
        }
    }
}

/// Shapley attribution of `model`'s probability for one aligned row.
pub fn explain_row(
    model: &dyn TabularModel,
    columns: &[String],
    row: ArrayView1<f64>,
    config: &AttributionConfig,
) -> Attributions {
    let n = columns.len();
    if n == 0 {
        return Attributions::unavailable("model has no feature columns");
    }
    if row.len() != n {
        return Attributions::unavailable(format!("row has {} values for {} columns", row.len(), n));
    }

    let background = model
        .background()
        .filter(|b| b.len() == n)
        .unwrap_or_else(|| Array1::from_elem(n, f64::NAN));

    let permutations = permutations(n, config);
    let steps = n + 1;

    // Each permutation contributes a chain of n + 1 rows, from all-background
    // to the full caller row.
    let mut batch = Array2::<f64>::zeros((permutations.len() * steps, n));
    for (p, perm) in permutations.iter().enumerate() {
        let mut current = background.clone();
        batch.row_mut(p * steps).assign(&current);
        for (k, &feature) in perm.iter().enumerate() {
            current[feature] = row[feature];
            batch.row_mut(p * steps + k + 1).assign(&current);
        }
    }

    let proba = match model.predict_proba(batch.view()) {
        Ok(proba) => proba,
        Err(e) => {
            log::warn!("Attribution skipped: {}", e);
            return Attributions::unavailable(e.to_string());
        }
    };
    if proba.len() != batch.nrows() {
        return Attributions::unavailable("model returned the wrong number of probabilities");
    }

    let mut phi = vec![0.0f64; n];
    for (p, perm) in permutations.iter().enumerate() {
        for (k, &feature) in perm.iter().enumerate() {
            phi[feature] += proba[p * steps + k + 1] - proba[p * steps + k];
        }
    }
    let count = permutations.len() as f64;

    if phi.iter().any(|v| !v.is_finite()) {
        return Attributions::unavailable("non-finite attribution");
    }

    Attributions::Computed(
        columns
            .iter()
            .zip(phi)
            .map(|(feature, total)| FeatureAttribution {
                feature: feature.clone(),
                value: total / count,
            })
            .collect(),
    )
}

/// Every permutation when `n!` fits the budget, a seeded sample otherwise.
fn permutations(n: usize, config: &AttributionConfig) -> Vec<Vec<usize>> {
    let budget = config.samples.max(1);
    let exact = (1..=n).try_fold(1usize, |acc, k| acc.checked_mul(k).filter(|f| *f <= budget));

    if exact.is_some() {
        let mut all = Vec::new();
        let mut perm: Vec<usize> = (0..n).collect();
        loop {
            all.push(perm.clone());
            if !next_permutation(&mut perm) {
                break;
            }
        }
        return all;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    (0..budget)
        .map(|_| {
            let mut perm: Vec<usize> = (0..n).collect();
            perm.shuffle(&mut rng);
            perm
        })
        .collect()
}

/// Lexicographic successor; false once the last permutation is reached.
fn next_permutation(perm: &mut [usize]) -> bool {
    let Some(i) = perm.windows(2).rposition(|w| w[0] < w[1]) else {
        return false;
    };
    let j = perm.iter().rposition(|&v| v > perm[i]).unwrap_or(i + 1);
    perm.swap(i, j);
    perm[i + 1..].reverse();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::model::{LogisticPipeline, StandardScaler};
    use ndarray::{array, ArrayView2};

    fn columns(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    fn pipeline(n: usize) -> LogisticPipeline {
        LogisticPipeline {
            feature_columns: columns(n),
            impute: Some(vec![1.0; n]),
            scaler: Some(StandardScaler {
                mean: vec![1.0; n],
                scale: vec![2.0; n],
            }),
            coefficients: (0..n).map(|i| 0.3 * (i as f64 + 1.0) * if i % 2 == 0 { 1.0 } else { -1.0 }).collect(),
            intercept: 0.1,
        }
    }

    fn proba(model: &LogisticPipeline, row: &Array1<f64>) -> f64 {
        let batch = row.clone().insert_axis(ndarray::Axis(0));
        model.predict_proba(batch.view()).unwrap()[0]
    }

    fn values(attr: &Attributions) -> Vec<f64> {
        match attr {
            Attributions::Computed(v) => v.iter().map(|a| a.value).collect(),
            Attributions::Unavailable { reason } => panic!("unavailable: {}", reason),
        }
    }

    #[test]
    fn test_exact_shapley_sums_to_prediction_gap() {
        let model = pipeline(3);
        let row = array![3.0, -1.0, 2.5];
        let attr = explain_row(&model, &columns(3), row.view(), &AttributionConfig::default());

        let total: f64 = values(&attr).iter().sum();
        let background = model.background().unwrap();
        let gap = proba(&model, &row) - proba(&model, &background);
        assert!((total - gap).abs() < 1e-12);
    }

    #[test]
    fn test_sampled_shapley_sums_to_prediction_gap() {
        let model = pipeline(7);
        let row = array![3.0, -1.0, 2.5, 0.0, 4.0, 1.5, -2.0];
        let attr = explain_row(&model, &columns(7), row.view(), &AttributionConfig::default());

        let total: f64 = values(&attr).iter().sum();
        let gap = proba(&model, &row) - proba(&model, &model.background().unwrap());
        assert!((total - gap).abs() < 1e-9);
    }

    #[test]
    fn test_single_differing_feature_takes_all_credit() {
        let model = pipeline(4);
        let row = array![1.0, 1.0, 5.0, 1.0];
        let attr = values(&explain_row(&model, &columns(4), row.view(), &AttributionConfig::default()));

        assert_eq!(attr[0], 0.0);
        assert_eq!(attr[1], 0.0);
        assert_eq!(attr[3], 0.0);
        let gap = proba(&model, &row) - proba(&model, &model.background().unwrap());
        assert!((attr[2] - gap).abs() < 1e-12);
    }

    #[test]
    fn test_missing_value_gets_no_credit() {
        let model = pipeline(2);
        let row = array![f64::NAN, 4.0];
        let attr = values(&explain_row(&model, &columns(2), row.view(), &AttributionConfig::default()));
        assert_eq!(attr[0], 0.0);
        assert!(attr[1] != 0.0);
    }

    #[test]
    fn test_sampling_is_deterministic_for_a_seed() {
        let model = pipeline(8);
        let row = Array1::from_iter((0..8).map(|i| i as f64 * 0.7 - 1.0));
        let config = AttributionConfig {
            samples: 16,
            ..AttributionConfig::default()
        };

        let a = explain_row(&model, &columns(8), row.view(), &config);
        let b = explain_row(&model, &columns(8), row.view(), &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_top_k_orders_by_magnitude() {
        let attr = Attributions::Computed(
            [("a", 0.1), ("b", -0.5), ("c", 0.3), ("d", 0.0)]
                .iter()
                .map(|(f, v)| FeatureAttribution {
                    feature: f.to_string(),
                    value: *v,
                })
                .collect(),
        );

        let top = attr.top_k(3);
        let names: Vec<_> = top.iter().map(|a| a.feature.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        assert_eq!(attr.top_k(10).len(), 4);
    }

    #[test]
    fn test_unavailable_without_columns() {
        let model = pipeline(2);
        let attr = explain_row(&model, &[], array![1.0, 2.0].view(), &AttributionConfig::default());
        assert!(!attr.is_available());
        assert!(attr.top_k(6).is_empty());
    }

    struct Failing;

    impl TabularModel for Failing {
        fn predict_proba(&self, _rows: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
            Err(ModelError::Runtime("boom".into()))
        }
    }

    #[test]
    fn test_model_error_is_contained() {
        let attr = explain_row(&Failing, &columns(2), array![1.0, 2.0].view(), &AttributionConfig::default());
        assert!(matches!(attr, Attributions::Unavailable { ref reason } if reason.contains("boom")));
    }

    #[test]
    fn test_permutation_enumeration() {
        let config = AttributionConfig::default();
        assert_eq!(permutations(3, &config).len(), 6);
        assert_eq!(permutations(5, &config).len(), 120);
        // 6! = 720 exceeds the budget of 128
        assert_eq!(permutations(6, &config).len(), 128);
    }
}
