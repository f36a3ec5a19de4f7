//! Statistical anomaly detection against precomputed baselines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::Severity;

use super::baseline::BaselineStats;

/// Configuration for baseline computation and outlier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum cohort size before statistical evaluation is trusted.
    pub min_samples: usize,
    /// Recompute baselines without first-pass outlier candidates.
    pub robust: bool,
    /// Fence multiplier used to pick first-pass outlier candidates.
    pub robust_iqr_k: f64,
    /// Default |z| threshold.
    pub z_threshold: f64,
    /// Default IQR multiplier for WARNING findings.
    pub iqr_warning_k: f64,
    /// Default IQR multiplier for ERROR findings.
    pub iqr_error_k: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_samples: 30,
            robust: true,
            robust_iqr_k: 3.0,
            z_threshold: 3.0,
            iqr_warning_k: 1.5,
            iqr_error_k: 3.0,
        }
    }
}

/// Outlier detection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[serde(alias = "zscore", alias = "z")]
    ZScore,
    Iqr,
}

/// Thresholds for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// |z| strictly above this is flagged WARNING.
    pub z: f64,
    /// Beyond `Q1/Q3 -/+ k * IQR` is flagged WARNING.
    pub iqr_warning_k: f64,
    /// Beyond `Q1/Q3 -/+ k * IQR` is flagged ERROR.
    pub iqr_error_k: f64,
}

impl Thresholds {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            z: config.z_threshold,
            iqr_warning_k: config.iqr_warning_k,
            iqr_error_k: config.iqr_error_k,
        }
    }
}

/// A detected statistical anomaly.
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub method: Method,
    pub severity: Severity,
    /// Z-score (z method) or distance beyond the nearest quartile in IQR units.
    pub score: f64,
    /// Bounds that were crossed.
    pub lower: f64,
    pub upper: f64,
}

/// Computes baselines and flags outliers.
#[derive(Debug, Clone, Default)]
pub struct StatisticalAnomalyDetector {
    config: DetectorConfig,
}

impl StatisticalAnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Compute a baseline from a cohort's values.
    ///
    /// In robust mode the first pass picks outlier candidates beyond the
    /// robust fences and the second pass recomputes without them, so extreme
    /// values do not widen the very thresholds used to detect them.
    pub fn compute_baseline(
        &self,
        field: &str,
        grouping: &str,
        cohort: &str,
        values: &[f64],
        computed_at: DateTime<Utc>,
    ) -> BaselineStats {
        let first = BaselineStats::from_values(field, grouping, cohort, values, computed_at);
        if !self.config.robust || first.count < 4 || first.iqr == 0.0 {
            return first;
        }

        let kept: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| v.is_finite() && !first.is_outside_fences(*v, self.config.robust_iqr_k))
            .collect();

        let excluded = first.count - kept.len();
        if excluded == 0 {
            return first;
        }

        let mut second = BaselineStats::from_values(field, grouping, cohort, &kept, computed_at);
        second.excluded = excluded;
        second
    }

    /// Whether a baseline has enough samples for statistical evaluation.
    pub fn is_usable(&self, baseline: &BaselineStats, min_samples: Option<usize>) -> bool {
        baseline.is_sufficient(min_samples.unwrap_or(self.config.min_samples))
    }

    /// Evaluate one value against a baseline. Boundary values are not flagged.
    pub fn evaluate(
        &self,
        value: f64,
        baseline: &BaselineStats,
        method: Method,
        thresholds: &Thresholds,
    ) -> Option<Anomaly> {
        match method {
            Method::ZScore => {
                let z = baseline.z_score(value)?;
                if z.abs() > thresholds.z {
                    Some(Anomaly {
                        method,
                        severity: Severity::Warning,
                        score: z,
                        lower: baseline.mean - thresholds.z * baseline.std_dev,
                        upper: baseline.mean + thresholds.z * baseline.std_dev,
                    })
                } else {
                    None
                }
            }
            Method::Iqr => {
                let (k, severity) = if baseline.is_outside_fences(value, thresholds.iqr_error_k) {
                    (thresholds.iqr_error_k, Severity::Error)
                } else if baseline.is_outside_fences(value, thresholds.iqr_warning_k) {
                    (thresholds.iqr_warning_k, Severity::Warning)
                } else {
                    return None;
                };

                let distance = if value > baseline.q3 {
                    value - baseline.q3
                } else {
                    baseline.q1 - value
                };
                let score = if baseline.iqr > 0.0 {
                    distance / baseline.iqr
                } else {
                    f64::INFINITY
                };

                Some(Anomaly {
                    method,
                    severity,
                    score: if score.is_finite() { score } else { f64::MAX },
                    lower: baseline.lower_fence(k),
                    upper: baseline.upper_fence(k),
                })
            }
        }
    }
}
