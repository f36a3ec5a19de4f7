//! Statistical anomaly detection: baselines, cohorts and the statistical rule kind.

mod baseline;
mod cohort;
mod detector;
mod rule;

pub use baseline::{BaselineStats, quantile};
pub use cohort::{
    ALL_COHORT, BaselineSet, BaselineTarget, CohortSpec, UNASSIGNED_COHORT, cohort_label,
};
pub use detector::{Anomaly, DetectorConfig, Method, StatisticalAnomalyDetector, Thresholds};
pub use rule::{FallbackRange, INSUFFICIENT_BASELINE, StatisticalRule};
