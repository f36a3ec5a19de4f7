//! Assay: auditable quality control for healthcare tabular records.
//!
//! Records are checked against a versioned rule set in four gated phases
//! (schema, business rules, statistical outliers, cross-field relations).
//! Every finding traces back to the exact rule revision that produced it,
//! and whole runs are committed to an append-only, hash-chained audit trail.
//!
//! # Core Principles
//!
//! - **Deterministic**: the same records, rules and baselines always yield
//!   the same ordered findings
//! - **Non-destructive**: records are never modified; remediation is
//!   recorded as new audit entries
//! - **Full lineage**: every finding names its rule id and version
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use assay::{AuditTrail, CsvSource, EngineConfig, JsonlSink, RecordSource, RuleRegistry, ValidationEngine};
//!
//! let registry = RuleRegistry::from_path("rules.json").unwrap();
//! let batch = CsvSource::new("admissions.csv")
//!     .with_fields(registry.fields())
//!     .records()
//!     .unwrap();
//!
//! let audit = Arc::new(AuditTrail::open(JsonlSink::open("audit.jsonl").unwrap()).unwrap());
//! let engine = ValidationEngine::new(EngineConfig::default()).unwrap().with_audit(audit);
//! let result = engine.validate(&batch, &registry, None).unwrap();
//!
//! println!("Score: {:.2}", result.score);
//! println!("Findings: {}", result.findings.len());
//! ```

pub mod audit;
pub mod config;
pub mod crossfield;
pub mod error;
pub mod input;
pub mod record;
pub mod result;
pub mod rules;
pub mod stats;
pub mod validation;

pub use audit::{AuditEntry, AuditEvent, AuditFilter, AuditSink, AuditTrail, JsonlSink, MemorySink};
pub use config::EngineConfig;
pub use crossfield::CrossFieldValidator;
pub use error::{AssayError, Result};
pub use input::{CsvConfig, CsvSource, JsonLinesSource, RecordSource};
pub use record::{FieldType, Ingested, Record, RecordBatch, ReferenceData, Value};
pub use result::{QcResult, QcSummary, ResultAggregator, RunStatus, SeverityWeights};
pub use rules::{Rule, RuleDefinition, RuleFactory, RuleKind, RuleRegistry, RuleSetDocument};
pub use stats::{BaselineSet, BaselineStats, StatisticalAnomalyDetector};
pub use validation::{
    CancelToken, Finding, Phase, RemediationStatus, Severity, StreamValidator, ValidationEngine,
};
