//! Engine configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AssayError, Result};
use crate::result::SeverityWeights;
use crate::stats::DetectorConfig;

/// Default per-rule evaluation budget.
pub const DEFAULT_RULE_TIMEOUT_MS: u64 = 250;

/// Configuration for a [`ValidationEngine`](crate::ValidationEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads for per-record evaluation.
    pub workers: usize,
    /// Per-rule evaluation budget in milliseconds, checked when the rule returns.
    pub rule_timeout_ms: u64,
    /// Baseline computation and outlier thresholds.
    pub detector: DetectorConfig,
    /// Quality score weights.
    pub weights: SeverityWeights,
    /// Actor recorded on audit entries written by runs.
    pub actor: String,
    /// Pin the run clock; findings then carry this timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timestamp: Option<DateTime<Utc>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            rule_timeout_ms: DEFAULT_RULE_TIMEOUT_MS,
            detector: DetectorConfig::default(),
            weights: SeverityWeights::default(),
            actor: "system".to_string(),
            run_timestamp: None,
        }
    }
}

impl EngineConfig {
    /// Read a JSON configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| AssayError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| AssayError::config(format!("invalid engine configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AssayError::config("workers must be at least 1"));
        }
        if self.rule_timeout_ms == 0 {
            return Err(AssayError::config("rule_timeout_ms must be at least 1"));
        }
        if self.detector.min_samples == 0 {
            return Err(AssayError::config("detector.min_samples must be at least 1"));
        }
        let w = &self.weights;
        if [w.info, w.warning, w.error, w.critical]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(AssayError::config("severity weights must be finite and non-negative"));
        }
        if w.error <= 0.0 {
            return Err(AssayError::config("the ERROR weight normalizes the score and must be positive"));
        }
        Ok(())
    }

    pub fn rule_timeout(&self) -> Duration {
        Duration::from_millis(self.rule_timeout_ms)
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Pin the run clock.
    pub fn with_run_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.run_timestamp = Some(at);
        self
    }

    /// Set the per-rule budget.
    pub fn with_rule_timeout(mut self, timeout: Duration) -> Self {
        self.rule_timeout_ms = timeout.as_millis().max(1) as u64;
        self
    }
}
