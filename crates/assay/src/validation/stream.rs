//! Single-record validation for message streams.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::record::{Ingested, Record, ReferenceData};
use crate::rules::{EvalContext, RuleRegistry};
use crate::stats::{BaselineSet, StatisticalAnomalyDetector};

use super::evaluator::{Evaluator, unparseable_finding};
use super::finding::Finding;

/// Validates records one at a time against previously computed baselines.
///
/// Each call runs the four phases on a singleton batch. Rules that fail or
/// time out stay disabled for the lifetime of the validator, which plays
/// the role of a run.
pub struct StreamValidator {
    registry: Arc<RuleRegistry>,
    baselines: Arc<BaselineSet>,
    references: Arc<ReferenceData>,
    detector: StatisticalAnomalyDetector,
    budget: Duration,
    run_timestamp: Option<DateTime<Utc>>,
    disabled: Mutex<HashSet<usize>>,
}

impl StreamValidator {
    pub fn new(registry: Arc<RuleRegistry>, baselines: Arc<BaselineSet>, config: &EngineConfig) -> Self {
        Self {
            registry,
            baselines,
            references: Arc::new(ReferenceData::new()),
            detector: StatisticalAnomalyDetector::new(config.detector.clone()),
            budget: config.rule_timeout(),
            run_timestamp: config.run_timestamp,
            disabled: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_references(mut self, references: Arc<ReferenceData>) -> Self {
        self.references = references;
        self
    }

    /// Findings for one record, in rule order.
    pub fn validate_one(&self, record: &Record) -> Vec<Finding> {
        let at = self.run_timestamp.unwrap_or_else(Utc::now);
        let evaluator = Evaluator::new(&self.registry, self.budget);
        let ctx = EvalContext::new(&self.references, &self.detector, self.registry.cohorts(), at)
            .with_baselines(&self.baselines);

        let skipped = self.disabled.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let skip = |rule: usize| skipped.contains(&rule);

        let mut failed_fields = Vec::new();
        let mut checks = evaluator.first_pass(record, &ctx, &mut failed_fields, skip);
        checks.extend(evaluator.second_pass(record, &ctx, &failed_fields, skip));

        let newly_disabled: Vec<usize> = checks
            .iter()
            .filter(|c| c.outcome.disables())
            .map(|c| c.rule)
            .collect();
        if !newly_disabled.is_empty() {
            let mut disabled = self.disabled.lock().unwrap_or_else(PoisonError::into_inner);
            for rule in newly_disabled {
                if disabled.insert(rule) {
                    tracing::warn!(
                        rule = %evaluator.rule(rule).definition().id,
                        record = record.id(),
                        "rule disabled for the rest of the stream"
                    );
                }
            }
        }

        checks.into_iter().filter_map(|c| c.outcome.into_finding()).collect()
    }

    /// Findings for one ingested entry; unparseable entries yield their
    /// single CRITICAL finding.
    pub fn validate_entry(&self, entry: &Ingested) -> Vec<Finding> {
        match entry {
            Ingested::Parsed(record) => self.validate_one(record),
            Ingested::Unparseable { record_id, reason } => {
                let at = self.run_timestamp.unwrap_or_else(Utc::now);
                vec![unparseable_finding(record_id, reason, None, at)]
            }
        }
    }

    /// Ids of rules disabled so far, in evaluation order.
    pub fn disabled_rules(&self) -> Vec<String> {
        let disabled = self.disabled.lock().unwrap_or_else(PoisonError::into_inner);
        let mut indices: Vec<usize> = disabled.iter().copied().collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .filter_map(|i| self.registry.rules().get(i))
            .map(|r| r.definition().id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordBatch;
    use crate::rules::RuleSetDocument;
    use crate::validation::ValidationEngine;

    fn registry() -> Arc<RuleRegistry> {
        let doc = RuleSetDocument::from_json(
            r#"{
                "version": "s1",
                "fields": [
                    {"name": "sbp", "type": "float", "required": true},
                    {"name": "dbp", "type": "float", "required": true}
                ],
                "rules": [
                    {"id": "sbp_range", "domain": "vitals", "field": "sbp", "kind": "range",
                     "parameters": {"max": 180}, "severity": "WARNING"},
                    {"id": "pulse_pressure", "domain": "vitals", "fields": ["sbp", "dbp"], "kind": "cross_field",
                     "parameters": {"relation": {"compare": {
                        "left": {"field": "sbp"}, "op": "gt", "right": {"field": "dbp"}}}},
                     "severity": "ERROR"}
                ]
            }"#,
        )
        .unwrap();
        Arc::new(RuleRegistry::load(doc).unwrap())
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_workers(1)
            .with_run_timestamp(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap())
    }

    #[test]
    fn test_matches_singleton_batch() {
        let registry = registry();
        let record = Record::new("p1", "live").with("sbp", 190.0).with("dbp", 200.0);

        let stream = StreamValidator::new(registry.clone(), Arc::new(BaselineSet::new()), &config());
        let streamed = stream.validate_one(&record);

        let engine = ValidationEngine::new(config()).unwrap();
        let batch = RecordBatch::from_records("live", vec![record]);
        let batched = engine.validate(&batch, &registry, Some(&BaselineSet::new())).unwrap();

        assert_eq!(streamed, batched.findings);
        assert_eq!(streamed.len(), 2);
    }

    #[test]
    fn test_unparseable_entry() {
        let stream = StreamValidator::new(registry(), Arc::new(BaselineSet::new()), &config());
        let entry = Ingested::Unparseable {
            record_id: "p9".to_string(),
            reason: "bad json".to_string(),
        };
        let findings = stream.validate_entry(&entry);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.starts_with("unparseable record"));
        assert!(stream.disabled_rules().is_empty());
    }
}
