//! Statistical outlier rule backed by per-cohort baselines.

use serde::Deserialize;
use serde_json::json;

use crate::error::{AssayError, Result};
use crate::record::Record;
use crate::rules::{BuildContext, EvalContext, Rule, RuleDefinition, parse_params, single_field};
use crate::validation::{Evidence, Finding, Phase, Severity};

use super::cohort::{ALL_COHORT, BaselineTarget, cohort_label};
use super::detector::{Method, Thresholds};

/// Message recorded when a cohort is too small for statistical evaluation.
pub const INSUFFICIENT_BASELINE: &str = "insufficient baseline data";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatisticalParams {
    method: Method,
    cohort: Option<String>,
    /// |z| threshold, or the IQR multiplier for WARNING findings.
    threshold: Option<f64>,
    /// IQR multiplier for ERROR findings.
    error_threshold: Option<f64>,
    min_samples: Option<usize>,
    fallback: Option<FallbackRange>,
    message: Option<String>,
}

/// Static clinical range used when a cohort's baseline is too small.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Defaults to the rule's severity.
    pub severity: Option<Severity>,
}

impl FallbackRange {
    fn contains(&self, v: f64) -> bool {
        !(self.min.is_some_and(|min| v < min) || self.max.is_some_and(|max| v > max))
    }
}

/// Flags values that are outliers relative to their cohort.
pub struct StatisticalRule {
    definition: RuleDefinition,
    field: String,
    method: Method,
    cohort: Option<String>,
    threshold: Option<f64>,
    error_threshold: Option<f64>,
    min_samples: Option<usize>,
    fallback: Option<FallbackRange>,
    message: Option<String>,
}

impl StatisticalRule {
    pub fn build(definition: &RuleDefinition, ctx: &BuildContext<'_>) -> Result<Self> {
        let field = single_field(definition)?.to_string();
        let spec = ctx.field(&definition.id, &field)?;
        if !spec.field_type.is_numeric() {
            return Err(AssayError::invalid_rule(
                &definition.id,
                format!("statistical target '{}' is not numeric", field),
            ));
        }

        let params: StatisticalParams = parse_params(definition)?;
        if let Some(ref cohort) = params.cohort {
            ctx.cohort(&definition.id, cohort)?;
        }
        for t in [params.threshold, params.error_threshold].into_iter().flatten() {
            if !(t.is_finite() && t > 0.0) {
                return Err(AssayError::invalid_rule(&definition.id, "thresholds must be positive"));
            }
        }
        if let (Some(warn), Some(err)) = (params.threshold, params.error_threshold) {
            if err < warn {
                return Err(AssayError::invalid_rule(
                    &definition.id,
                    "error_threshold must not be below threshold",
                ));
            }
        }
        if let Some(ref fallback) = params.fallback {
            if let (Some(min), Some(max)) = (fallback.min, fallback.max) {
                if min > max {
                    return Err(AssayError::invalid_rule(
                        &definition.id,
                        format!("fallback min {} is greater than max {}", min, max),
                    ));
                }
            }
        }

        Ok(Self {
            definition: definition.clone(),
            field,
            method: params.method,
            cohort: params.cohort,
            threshold: params.threshold,
            error_threshold: params.error_threshold,
            min_samples: params.min_samples,
            fallback: params.fallback,
            message: params.message,
        })
    }

    fn thresholds(&self, ctx: &EvalContext<'_>) -> Thresholds {
        let mut thresholds = Thresholds::from_config(ctx.detector.config());
        match self.method {
            Method::ZScore => {
                if let Some(t) = self.threshold {
                    thresholds.z = t;
                }
            }
            Method::Iqr => {
                if let Some(t) = self.threshold {
                    thresholds.iqr_warning_k = t;
                }
                if let Some(t) = self.error_threshold {
                    thresholds.iqr_error_k = t;
                }
            }
        }
        thresholds
    }

    fn fall_back(&self, record: &Record, v: f64, label: &str, samples: usize, ctx: &EvalContext<'_>) -> Finding {
        let min_samples = self.min_samples.unwrap_or(ctx.detector.config().min_samples);
        let evidence = Evidence::new().with_observed(v).with_cohort(label);

        match self.fallback {
            Some(ref range) if !range.contains(v) => Finding::new(
                &self.definition,
                record.id(),
                Phase::Statistical,
                format!(
                    "{} value {} outside static range [{}, {}] ({} for cohort '{}')",
                    self.field,
                    v,
                    range.min.map(|m| m.to_string()).unwrap_or_else(|| "-inf".to_string()),
                    range.max.map(|m| m.to_string()).unwrap_or_else(|| "inf".to_string()),
                    INSUFFICIENT_BASELINE,
                    label
                ),
                ctx.detected_at,
            )
            .with_severity(range.severity.unwrap_or(self.definition.severity))
            .with_evidence(evidence.with_expected(json!({
                "min": range.min,
                "max": range.max,
                "min_samples": min_samples,
                "samples": samples,
            }))),
            _ => Finding::new(
                &self.definition,
                record.id(),
                Phase::Statistical,
                INSUFFICIENT_BASELINE,
                ctx.detected_at,
            )
            .with_severity(Severity::Info)
            .with_evidence(evidence.with_expected(json!({"min_samples": min_samples, "samples": samples}))),
        }
    }
}

impl Rule for StatisticalRule {
    fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    fn phase(&self) -> Phase {
        Phase::Statistical
    }

    fn baseline_target(&self) -> Option<BaselineTarget> {
        Some(BaselineTarget {
            field: self.field.clone(),
            grouping: self.cohort.clone(),
        })
    }

    fn evaluate(&self, record: &Record, ctx: &EvalContext<'_>) -> Result<Option<Finding>> {
        let Some(value) = record.get(&self.field) else {
            return Ok(None);
        };
        let v = value.as_f64().ok_or_else(|| AssayError::RuleEvaluation {
            rule_id: self.definition.id.clone(),
            message: format!("'{}' is not numeric: {}", self.field, value),
        })?;

        let grouping = self.cohort.as_deref().unwrap_or(ALL_COHORT);
        let label = cohort_label(record, self.cohort.as_deref(), ctx.cohorts);
        let baseline = ctx.baselines.and_then(|set| set.get(&self.field, grouping, &label));

        let baseline = match baseline {
            Some(b) if ctx.detector.is_usable(b, self.min_samples) => b,
            other => {
                let samples = other.map(|b| b.cohort_size()).unwrap_or(0);
                return Ok(Some(self.fall_back(record, v, &label, samples, ctx)));
            }
        };

        let thresholds = self.thresholds(ctx);
        let Some(anomaly) = ctx.detector.evaluate(v, baseline, self.method, &thresholds) else {
            return Ok(None);
        };

        let message = self.message.clone().unwrap_or_else(|| match self.method {
            Method::ZScore => format!(
                "{} value {} is a statistical outlier (z = {:.2}) for cohort '{}'",
                self.field, v, anomaly.score, label
            ),
            Method::Iqr => format!(
                "{} value {} is outside the IQR fences [{}, {}] for cohort '{}'",
                self.field, v, anomaly.lower, anomaly.upper, label
            ),
        });

        let mut evidence = Evidence::new()
            .with_observed(v)
            .with_expected(json!({"lower": anomaly.lower, "upper": anomaly.upper, "method": self.method}))
            .with_cohort(label);
        if self.method == Method::ZScore {
            evidence = evidence.with_z_score(anomaly.score);
        }

        Ok(Some(
            Finding::new(&self.definition, record.id(), Phase::Statistical, message, ctx.detected_at)
                .with_severity(anomaly.severity)
                .with_evidence(evidence),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ReferenceData;
    use crate::rules::FieldSpec;
    use crate::record::FieldType;
    use crate::stats::{BaselineSet, CohortSpec, StatisticalAnomalyDetector};
    use chrono::{DateTime, Utc};
    use indexmap::IndexMap;

    fn fields() -> IndexMap<String, FieldSpec> {
        let mut fields = IndexMap::new();
        for (name, field_type) in [("sbp", FieldType::Float), ("unit", FieldType::String)] {
            fields.insert(
                name.to_string(),
                FieldSpec {
                    name: name.to_string(),
                    field_type,
                    required: false,
                },
            );
        }
        fields
    }

    fn cohorts() -> IndexMap<String, CohortSpec> {
        let mut cohorts = IndexMap::new();
        cohorts.insert(
            "care_unit".to_string(),
            CohortSpec {
                field: "unit".to_string(),
                bands: None,
            },
        );
        cohorts
    }

    fn rule(parameters: serde_json::Value) -> StatisticalRule {
        let definition: RuleDefinition = serde_json::from_value(json!({
            "id": "sbp.outlier", "domain": "vitals", "field": "sbp",
            "kind": "statistical", "severity": "WARNING", "parameters": parameters
        }))
        .unwrap();
        let fields = fields();
        let cohorts = cohorts();
        StatisticalRule::build(&definition, &BuildContext { fields: &fields, cohorts: &cohorts }).unwrap()
    }

    fn records(unit: &str, n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                Record::new(format!("{}-{}", unit, i), "b")
                    .with("unit", unit)
                    .with("sbp", 110.0 + (i % 10) as f64)
            })
            .collect()
    }

    fn run(rule: &StatisticalRule, population: &[Record], record: &Record) -> Option<Finding> {
        let detector = StatisticalAnomalyDetector::default();
        let references = ReferenceData::new();
        let cohorts = cohorts();
        let at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let baselines = BaselineSet::compute(
            population,
            &[rule.baseline_target().unwrap()],
            &cohorts,
            &detector,
            at,
        );
        let ctx = EvalContext::new(&references, &detector, &cohorts, at).with_baselines(&baselines);
        rule.evaluate(record, &ctx).unwrap()
    }

    #[test]
    fn test_iqr_outlier_in_cohort() {
        let rule = rule(json!({"method": "iqr", "cohort": "care_unit"}));
        let population = records("ICU", 40);
        let record = Record::new("x", "b").with("unit", "ICU").with("sbp", 200.0);

        let finding = run(&rule, &population, &record).unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert_eq!(finding.evidence.cohort.as_deref(), Some("ICU"));
    }

    #[test]
    fn test_small_cohort_falls_back_to_static_range() {
        let rule = rule(json!({
            "method": "z_score", "cohort": "care_unit",
            "fallback": {"min": 70, "max": 180, "severity": "ERROR"}
        }));
        let mut population = records("ICU", 40);
        population.extend(records("NICU", 10));

        // Far outside the NICU distribution but inside the static range.
        let inside = Record::new("x", "b").with("unit", "NICU").with("sbp", 175.0);
        let finding = run(&rule, &population, &inside).unwrap();
        assert_eq!(finding.severity, Severity::Info);
        assert_eq!(finding.message, INSUFFICIENT_BASELINE);
        assert!(finding.evidence.z_score.is_none());

        let outside = Record::new("y", "b").with("unit", "NICU").with("sbp", 190.0);
        let finding = run(&rule, &population, &outside).unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.message.contains(INSUFFICIENT_BASELINE));
        let expected = finding.evidence.expected.unwrap();
        assert_eq!(expected["min_samples"], json!(30));
        assert_eq!(expected["samples"], json!(10));
        assert_eq!(expected["max"], json!(180.0));
    }

    #[test]
    fn test_outlier_in_minimum_cohort_is_evaluated() {
        let rule = rule(json!({"method": "iqr", "cohort": "care_unit"}));
        let mut population = records("ICU", 29);
        let outlier = Record::new("ICU-spike", "b").with("unit", "ICU").with("sbp", 1000.0);
        population.push(outlier.clone());

        let finding = run(&rule, &population, &outlier).unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(!finding.message.contains(INSUFFICIENT_BASELINE));
    }

    #[test]
    fn test_missing_cohort_baseline_is_insufficient() {
        let rule = rule(json!({"method": "iqr", "cohort": "care_unit"}));
        let population = records("ICU", 40);
        let record = Record::new("x", "b").with("unit", "PACU").with("sbp", 112.0);

        let finding = run(&rule, &population, &record).unwrap();
        assert_eq!(finding.severity, Severity::Info);
    }

    #[test]
    fn test_threshold_override() {
        let strict = rule(json!({"method": "z_score", "threshold": 1.0}));
        let population = records("ICU", 40);
        let record = Record::new("x", "b").with("sbp", 121.0);
        assert!(run(&strict, &population, &record).is_some());

        let lenient = rule(json!({"method": "z_score"}));
        assert!(run(&lenient, &population, &record).is_none());
    }
}
