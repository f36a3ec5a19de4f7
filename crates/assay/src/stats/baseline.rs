//! Baseline statistics for a (field, cohort) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// RUNNING MOMENTS
// =============================================================================
// Welford's online algorithm for mean and variance in a single pass.

#[derive(Debug, Clone, Default)]
struct RunningMoments {
    count: usize,
    mean: f64,
    m2: f64, // Sum of squared differences from mean
}

impl RunningMoments {
    fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Population variance.
    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Quantile of an ascending-sorted slice by linear interpolation between
/// closest ranks (`h = (n - 1) * p`).
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lower = h.floor() as usize;
            let upper = h.ceil() as usize;
            sorted[lower] + (h - lower as f64) * (sorted[upper] - sorted[lower])
        }
    }
}

/// Summary statistics for one field within one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub field: String,
    /// Name of the cohort definition (`"all"` when ungrouped).
    pub grouping: String,
    /// Cohort label within the grouping.
    pub cohort: String,
    pub mean: f64,
    pub std_dev: f64,
    /// First quartile (25th percentile).
    pub q1: f64,
    pub median: f64,
    /// Third quartile (75th percentile).
    pub q3: f64,
    pub iqr: f64,
    /// Number of values the statistics were computed from.
    pub count: usize,
    /// Number of values dropped by the robust second pass.
    #[serde(default)]
    pub excluded: usize,
    pub computed_at: DateTime<Utc>,
}

impl BaselineStats {
    /// Compute statistics from raw values in a single pass.
    ///
    /// Non-finite values are ignored. The result does not depend on input
    /// order beyond floating-point summation order of the mean.
    pub fn from_values(
        field: impl Into<String>,
        grouping: impl Into<String>,
        cohort: impl Into<String>,
        values: &[f64],
        computed_at: DateTime<Utc>,
    ) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);

        let mut moments = RunningMoments::default();
        for &v in &sorted {
            moments.add(v);
        }

        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);

        Self {
            field: field.into(),
            grouping: grouping.into(),
            cohort: cohort.into(),
            mean: moments.mean,
            std_dev: moments.variance().sqrt(),
            q1,
            median: quantile(&sorted, 0.5),
            q3,
            iqr: q3 - q1,
            count: moments.count,
            excluded: 0,
            computed_at,
        }
    }

    /// Z-score of a value, or `None` when the spread is zero.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.std_dev == 0.0 || !self.std_dev.is_finite() {
            None
        } else {
            Some((value - self.mean) / self.std_dev)
        }
    }

    /// Lower Tukey fence `Q1 - k * IQR`.
    pub fn lower_fence(&self, k: f64) -> f64 {
        self.q1 - k * self.iqr
    }

    /// Upper Tukey fence `Q3 + k * IQR`.
    pub fn upper_fence(&self, k: f64) -> f64 {
        self.q3 + k * self.iqr
    }

    /// Whether the value lies strictly outside the `k` fences.
    pub fn is_outside_fences(&self, value: f64, k: f64) -> bool {
        value < self.lower_fence(k) || value > self.upper_fence(k)
    }

    /// Values the cohort contributed, including those the robust pass dropped.
    pub fn cohort_size(&self) -> usize {
        self.count + self.excluded
    }

    /// Whether the cohort is large enough for statistical evaluation.
    pub fn is_sufficient(&self, min_samples: usize) -> bool {
        self.cohort_size() >= min_samples
    }
}
