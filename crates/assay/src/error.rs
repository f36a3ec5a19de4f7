//! Error types for the assay library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for assay operations.
#[derive(Debug, Error)]
pub enum AssayError {
    /// Error reading or accessing a file.
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed rule-set or engine configuration. Fatal at load time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A specific rule definition could not be accepted. Fatal at load time.
    #[error("Configuration error in rule '{rule_id}': {message}")]
    InvalidRule { rule_id: String, message: String },

    /// A record payload could not be turned into a [`Record`](crate::Record).
    #[error("Unparseable record '{record_id}': {reason}")]
    Record { record_id: String, reason: String },

    /// A rule predicate failed while evaluating a record.
    #[error("Rule '{rule_id}' failed: {message}")]
    RuleEvaluation { rule_id: String, message: String },

    /// A rule exceeded its evaluation budget.
    #[error("Rule '{rule_id}' exceeded its {budget_ms} ms evaluation budget")]
    Timeout { rule_id: String, budget_ms: u64 },

    /// Appending to the audit ledger failed. Always fatal for the run.
    #[error("Audit write failed for run {run_id} (last durable entry: {last_entry:?}): {source}")]
    AuditWrite {
        run_id: u64,
        last_entry: Option<u64>,
        #[source]
        source: std::io::Error,
    },

    /// The audit ledger does not hold together (hash chain or ordering broken).
    #[error("Audit ledger integrity violation at entry {entry_id}: {message}")]
    AuditIntegrity { entry_id: u64, message: String },

    /// Illegal remediation transition or unknown finding.
    #[error("Remediation error: {0}")]
    Remediation(String),

    /// Saving or loading a persisted artifact failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// No data to work with.
    #[error("Empty data: {0}")]
    EmptyData(String),

    /// Error from the CSV library.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Regex compilation error.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl AssayError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        AssayError::Config(message.into())
    }

    pub(crate) fn invalid_rule(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        AssayError::InvalidRule {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for assay operations.
pub type Result<T> = std::result::Result<T, AssayError>;
