//! Findings: recorded outcomes of rule evaluations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::rules::RuleDefinition;

/// Severity level of a finding, ordered INFO < WARNING < ERROR < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational only, not evidence of a defect.
    #[serde(alias = "info")]
    Info,
    /// Potential issue that should be reviewed.
    #[serde(alias = "warning")]
    Warning,
    /// Definite issue that should be addressed.
    #[serde(alias = "error")]
    Error,
    /// Issue that invalidates the record or the run.
    #[serde(alias = "critical")]
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
        }
    }

    /// Whether findings at this level count as failures for baseline exclusion.
    pub fn is_failure(&self) -> bool {
        *self >= Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(format!(
                "Unknown severity: {}. Use info, warning, error, or critical.",
                s
            )),
        }
    }
}

/// Remediation status of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemediationStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl RemediationStatus {
    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: RemediationStatus) -> bool {
        matches!(
            (self, next),
            (RemediationStatus::Open, RemediationStatus::Acknowledged)
                | (RemediationStatus::Open, RemediationStatus::Resolved)
                | (RemediationStatus::Acknowledged, RemediationStatus::Resolved)
        )
    }
}

impl fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemediationStatus::Open => "OPEN",
            RemediationStatus::Acknowledged => "ACKNOWLEDGED",
            RemediationStatus::Resolved => "RESOLVED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RemediationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(RemediationStatus::Open),
            "ACKNOWLEDGED" | "ACK" => Ok(RemediationStatus::Acknowledged),
            "RESOLVED" => Ok(RemediationStatus::Resolved),
            _ => Err(format!(
                "Unknown status: {}. Use open, acknowledged, or resolved.",
                s
            )),
        }
    }
}

/// Evaluation phase that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Schema,
    Business,
    Statistical,
    CrossField,
}

/// Evidence supporting a finding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// The observed value(s).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<JsonValue>,
    /// Expected value, set or range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<JsonValue>,
    /// Z-score for statistical outliers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    /// Cohort the baseline was taken from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
}

impl Evidence {
    /// Create empty evidence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the observed value.
    pub fn with_observed(mut self, value: impl Into<JsonValue>) -> Self {
        self.observed = Some(value.into());
        self
    }

    /// Set expected value.
    pub fn with_expected(mut self, expected: impl Into<JsonValue>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// Set z-score.
    pub fn with_z_score(mut self, z: f64) -> Self {
        self.z_score = Some(z);
        self
    }

    /// Set cohort.
    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.cohort = Some(cohort.into());
        self
    }
}

/// One recorded outcome of a rule evaluation against a record.
///
/// Core fields are never edited after creation. Remediation progress is
/// recorded as linked audit entries, so `status` on a finding is always the
/// status it was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Identifier, unique within a run: `<record>:<rule>@<version>`.
    pub id: String,
    pub record_id: String,
    pub rule_id: String,
    pub rule_version: u32,
    /// Domain tag of the rule.
    pub domain: String,
    /// Fields the finding refers to.
    pub fields: Vec<String>,
    pub phase: Phase,
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    pub evidence: Evidence,
    /// When detected (the run clock).
    pub detected_at: DateTime<Utc>,
    pub status: RemediationStatus,
}

impl Finding {
    /// Create a finding for `rule` against `record_id` with the rule's
    /// configured severity.
    pub fn new(
        rule: &RuleDefinition,
        record_id: &str,
        phase: Phase,
        message: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("{}:{}@{}", record_id, rule.id, rule.version),
            record_id: record_id.to_string(),
            rule_id: rule.id.clone(),
            rule_version: rule.version,
            domain: rule.domain.clone(),
            fields: rule.fields.clone(),
            phase,
            severity: rule.severity,
            message: message.into(),
            evidence: Evidence::new(),
            detected_at,
            status: RemediationStatus::Open,
        }
    }

    /// Override the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the evidence.
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// Narrow the fields the finding refers to.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Whether the finding mentions the given field.
    pub fn references_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.eq_ignore_ascii_case(field))
    }
}
