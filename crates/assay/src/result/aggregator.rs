//! Turns a run's findings into a scored, queryable result.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::validation::{Finding, Severity};

/// Per-severity penalty weights used by the quality score.
///
/// The score formula is a published contract: changing a weight is a
/// configuration change and is recorded with every result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub info: f64,
    pub warning: f64,
    pub error: f64,
    pub critical: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            info: 0.0,
            warning: 0.25,
            error: 1.0,
            critical: 2.0,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Info => self.info,
            Severity::Warning => self.warning,
            Severity::Error => self.error,
            Severity::Critical => self.critical,
        }
    }

    /// Quality score in `[0, 1]`:
    /// `1 - sum(weight(f)) / (total_checks * weight(ERROR))`.
    ///
    /// A run with no checks scores 1.
    pub fn score<'a>(&self, findings: impl IntoIterator<Item = &'a Finding>, total_checks: usize) -> f64 {
        let penalty: f64 = findings.into_iter().map(|f| self.weight(f.severity)).sum();
        let capacity = total_checks as f64 * self.error;
        if total_checks == 0 || capacity <= 0.0 {
            return if penalty > 0.0 && total_checks > 0 { 0.0 } else { 1.0 };
        }
        (1.0 - penalty / capacity).clamp(0.0, 1.0)
    }
}

/// Whether a run evaluated its whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Complete,
    /// Cancelled before every record was evaluated.
    Incomplete,
}

/// Counts of findings by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.error + self.warning + self.info
    }
}

/// Run metadata carried into the result.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub run_id: Option<u64>,
    pub ruleset_version: String,
    pub ruleset_digest: String,
    pub batch_id: String,
    pub status: RunStatus,
    pub records_total: usize,
    pub records_evaluated: usize,
}

/// Aggregate view over one run's findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcResult {
    /// Audit run id, when the run was committed to an audit trail.
    pub run_id: Option<u64>,
    pub ruleset_version: String,
    pub ruleset_digest: String,
    pub batch_id: String,
    pub status: RunStatus,
    pub records_total: usize,
    pub records_evaluated: usize,
    /// Rule evaluations performed, the score's normalizer.
    pub total_checks: usize,
    pub score: f64,
    pub weights: SeverityWeights,
    pub by_severity: SeverityCounts,
    /// Severity counts per rule domain, sorted by domain.
    pub by_domain: IndexMap<String, SeverityCounts>,
    /// Findings in deterministic evaluation order.
    pub findings: Vec<Finding>,
}

/// Dashboard-oriented summary of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcSummary {
    pub run_id: Option<u64>,
    pub ruleset_version: String,
    pub batch_id: String,
    pub status: RunStatus,
    pub score: f64,
    pub total_checks: usize,
    pub records_evaluated: usize,
    pub records_total: usize,
    pub finding_count: usize,
    pub by_severity: SeverityCounts,
    pub by_domain: IndexMap<String, SeverityCounts>,
    /// Human-readable recommendation.
    pub recommendation: String,
}

impl QcResult {
    /// Summary without the finding list.
    pub fn summary(&self) -> QcSummary {
        QcSummary {
            run_id: self.run_id,
            ruleset_version: self.ruleset_version.clone(),
            batch_id: self.batch_id.clone(),
            status: self.status,
            score: self.score,
            total_checks: self.total_checks,
            records_evaluated: self.records_evaluated,
            records_total: self.records_total,
            finding_count: self.findings.len(),
            by_severity: self.by_severity,
            by_domain: self.by_domain.clone(),
            recommendation: self.recommendation(),
        }
    }

    /// Findings at or above `severity`, lazily filtered.
    pub fn failures(&self, severity: Severity) -> impl Iterator<Item = &Finding> + '_ {
        self.findings.iter().filter(move |f| f.severity >= severity)
    }

    /// Findings raised by rules of one domain.
    pub fn in_domain<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.domain == domain)
    }

    /// Serializable form of the whole result.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Pretty-printed JSON form of the whole result.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    fn recommendation(&self) -> String {
        let counts = &self.by_severity;
        if self.status == RunStatus::Incomplete {
            format!(
                "Run was cancelled after {} of {} records; re-run before relying on this result.",
                self.records_evaluated, self.records_total
            )
        } else if counts.critical > 0 {
            format!(
                "Resolve {} critical findings before releasing this batch.",
                counts.critical
            )
        } else if counts.error > 0 {
            format!(
                "Address {} error-level findings before proceeding with analysis.",
                counts.error
            )
        } else if counts.warning > 5 {
            format!(
                "Review {} warning-level findings (score: {:.0}%).",
                counts.warning,
                self.score * 100.0
            )
        } else if self.score >= 0.9 {
            "Data quality is good. Minor findings recorded for review.".to_string()
        } else {
            "Data quality needs attention. Review all findings.".to_string()
        }
    }
}

/// Builds [`QcResult`]s with a fixed set of weights.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    weights: SeverityWeights,
}

impl ResultAggregator {
    pub fn new(weights: SeverityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SeverityWeights {
        &self.weights
    }

    /// Score and group a run's findings.
    pub fn aggregate(&self, findings: Vec<Finding>, total_checks: usize, info: RunInfo) -> QcResult {
        let mut by_severity = SeverityCounts::default();
        let mut by_domain: IndexMap<String, SeverityCounts> = IndexMap::new();
        for finding in &findings {
            by_severity.add(finding.severity);
            by_domain
                .entry(finding.domain.clone())
                .or_default()
                .add(finding.severity);
        }
        by_domain.sort_keys();

        QcResult {
            run_id: info.run_id,
            ruleset_version: info.ruleset_version,
            ruleset_digest: info.ruleset_digest,
            batch_id: info.batch_id,
            status: info.status,
            records_total: info.records_total,
            records_evaluated: info.records_evaluated,
            total_checks,
            score: self.weights.score(&findings, total_checks),
            weights: self.weights,
            by_severity,
            by_domain,
            findings,
        }
    }
}
