//! Risk Thresholds
//!
//! Buckets a positive-class probability into low / mild / high risk.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("thresholds must satisfy 0 <= low <= high <= 1 (got low={low}, high={high})")]
pub struct ThresholdError {
    pub low: f64,
    pub high: f64,
}

/// Threshold Configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Probabilities below this are `low`
    pub low: f64,

    /// Probabilities at or above this are `high`
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.40,
            high: 0.65,
        }
    }
}

impl RiskThresholds {
    pub fn new(low: f64, high: f64) -> Result<Self, ThresholdError> {
        let thresholds = Self { low, high };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if in_range(self.low) && in_range(self.high) && self.low <= self.high {
            Ok(())
        } else {
            Err(ThresholdError {
                low: self.low,
                high: self.high,
            })
        }
    }

    pub fn categorize(&self, probability: f64) -> RiskCategory {
        if probability < self.low {
            RiskCategory::Low
        } else if probability < self.high {
            RiskCategory::Mild
        } else {
            RiskCategory::High
        }
    }
}

/// Risk bucket reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Low,
    Mild,
    High,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Mild => "mild",
            Self::High => "high",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = RiskThresholds::default();
        assert_eq!(t.low, 0.40);
        assert_eq!(t.high, 0.65);
    }

    #[test]
    fn test_categorize_boundaries() {
        let t = RiskThresholds::default();

        assert_eq!(t.categorize(0.0), RiskCategory::Low);
        assert_eq!(t.categorize(0.3999), RiskCategory::Low);
        // low threshold itself is already mild
        assert_eq!(t.categorize(0.40), RiskCategory::Mild);
        assert_eq!(t.categorize(0.6499), RiskCategory::Mild);
        // high threshold itself is high
        assert_eq!(t.categorize(0.65), RiskCategory::High);
        assert_eq!(t.categorize(1.0), RiskCategory::High);
    }

    #[test]
    fn test_equal_thresholds_skip_mild() {
        let t = RiskThresholds::new(0.5, 0.5).unwrap();
        assert_eq!(t.categorize(0.49), RiskCategory::Low);
        assert_eq!(t.categorize(0.5), RiskCategory::High);
    }

    #[test]
    fn test_invalid_thresholds() {
        assert!(RiskThresholds::new(0.7, 0.3).is_err());
        assert!(RiskThresholds::new(-0.1, 0.3).is_err());
        assert!(RiskThresholds::new(0.1, 1.3).is_err());
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&RiskCategory::Mild).unwrap();
        assert_eq!(json, "\"mild\"");
    }
}
