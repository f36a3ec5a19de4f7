//! Read-only context handed to every rule evaluation.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::{AssayError, Result};
use crate::record::ReferenceData;
use crate::stats::{BaselineSet, CohortSpec, StatisticalAnomalyDetector};

use super::definition::FieldSpec;

/// Everything a rule may consult besides the record itself.
///
/// Reference data and baselines are borrowed for the duration of a run and
/// never mutated through the context.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub references: &'a ReferenceData,
    /// Finalized baselines, or `None` before the baseline barrier.
    pub baselines: Option<&'a BaselineSet>,
    pub detector: &'a StatisticalAnomalyDetector,
    pub cohorts: &'a IndexMap<String, CohortSpec>,
    /// Run clock stamped on every finding.
    pub detected_at: DateTime<Utc>,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        references: &'a ReferenceData,
        detector: &'a StatisticalAnomalyDetector,
        cohorts: &'a IndexMap<String, CohortSpec>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            references,
            baselines: None,
            detector,
            cohorts,
            detected_at,
        }
    }

    /// Attach finalized baselines.
    pub fn with_baselines(mut self, baselines: &'a BaselineSet) -> Self {
        self.baselines = Some(baselines);
        self
    }
}

/// Declarations a rule may resolve against while it is being compiled.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub fields: &'a IndexMap<String, FieldSpec>,
    pub cohorts: &'a IndexMap<String, CohortSpec>,
}

impl<'a> BuildContext<'a> {
    /// Resolve a declared field or fail with a rule-scoped config error.
    pub fn field(&self, rule_id: &str, name: &str) -> Result<&'a FieldSpec> {
        self.fields.get(name).ok_or_else(|| {
            AssayError::invalid_rule(rule_id, format!("unknown field reference '{}'", name))
        })
    }

    /// Resolve a declared cohort grouping.
    pub fn cohort(&self, rule_id: &str, name: &str) -> Result<&'a CohortSpec> {
        self.cohorts.get(name).ok_or_else(|| {
            AssayError::invalid_rule(rule_id, format!("unknown cohort '{}'", name))
        })
    }
}
