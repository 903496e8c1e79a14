//! Target class selection from raw logits

use ndarray::{Array2, ArrayView1};

use crate::error::ExplainError;

/// Selected class, its probability and the full probability vector.
///
/// Multi-class outputs go through a softmax. A single logit is a binary
/// sigmoid head: the probability vector becomes `[1 - p, p]` and the score is
/// the logit itself (negated when the negative class is selected).
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSelection {
    pub index: usize,
    pub probability: f32,
    pub probabilities: Vec<f32>,
    /// d(score)/d(logits)
    seed: Vec<f32>,
}

impl ClassSelection {
    pub fn from_logits(
        logits: ArrayView1<f32>,
        class_index: Option<usize>,
    ) -> Result<Self, ExplainError> {
        if logits.is_empty() {
            return Err(ExplainError::EmptyOutput);
        }
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(ExplainError::NonFinite);
        }

        if logits.len() == 1 {
            let p = 1.0 / (1.0 + (-logits[0]).exp());
            let index = class_index.unwrap_or(1);
            if index > 1 {
                return Err(ExplainError::ClassOutOfRange { index, classes: 2 });
            }
            let probabilities = vec![1.0 - p, p];
            let sign = if index == 1 { 1.0 } else { -1.0 };
            return Ok(Self {
                index,
                probability: probabilities[index],
                probabilities,
                seed: vec![sign],
            });
        }

        let probabilities = softmax(logits);
        let index = match class_index {
            Some(i) => i,
            None => argmax(&probabilities),
        };
        if index >= probabilities.len() {
            return Err(ExplainError::ClassOutOfRange {
                index,
                classes: probabilities.len(),
            });
        }

        let mut seed = vec![0.0; logits.len()];
        seed[index] = 1.0;

        Ok(Self {
            index,
            probability: probabilities[index],
            probabilities,
            seed,
        })
    }

    /// Class with the highest probability
    pub fn top_index(&self) -> usize {
        argmax(&self.probabilities)
    }

    /// Score the gradient is taken of, evaluated on another logit vector.
    pub fn score(&self, logits: ArrayView1<f32>) -> f32 {
        self.seed.iter().zip(logits.iter()).map(|(s, l)| s * l).sum()
    }

    /// Backward seed for a `[batch, classes]` logit matrix; only row 0 is scored.
    pub fn seed_matrix(&self, batch: usize) -> Array2<f32> {
        let mut seed = Array2::zeros((batch.max(1), self.seed.len()));
        for (j, s) in self.seed.iter().enumerate() {
            seed[[0, j]] = *s;
        }
        seed
    }
}

fn softmax(logits: ArrayView1<f32>) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}
