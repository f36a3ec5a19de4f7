//! Cross-field rule kind and its validator.

use serde::Deserialize;
use serde_json::json;

use crate::error::{AssayError, Result};
use crate::record::Record;
use crate::rules::{BuildContext, EvalContext, Rule, RuleDefinition, parse_params};
use crate::validation::{Evidence, Finding, Phase, Severity};

use super::relation::{Outcome, Relation};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CrossFieldParams {
    relation: Relation,
    message: Option<String>,
}

/// A relation spanning several fields or an external reference value.
pub struct CrossFieldRule {
    definition: RuleDefinition,
    relation: Relation,
    message: Option<String>,
}

impl CrossFieldRule {
    pub fn build(definition: &RuleDefinition, ctx: &BuildContext<'_>) -> Result<Self> {
        let params: CrossFieldParams = parse_params(definition)?;

        for field in params.relation.fields() {
            ctx.field(&definition.id, &field)?;
        }
        if let Some(literal) = params.relation.invalid_literals().first() {
            return Err(AssayError::invalid_rule(
                &definition.id,
                format!("literal {} is not a scalar", literal),
            ));
        }
        if let Relation::Ratio { min, max, .. } = &params.relation {
            match (min, max) {
                (None, None) => {
                    return Err(AssayError::invalid_rule(&definition.id, "ratio needs min or max"));
                }
                (Some(lo), Some(hi)) if lo > hi => {
                    return Err(AssayError::invalid_rule(
                        &definition.id,
                        format!("min {} is greater than max {}", lo, hi),
                    ));
                }
                _ => {}
            }
        }

        Ok(Self {
            definition: definition.clone(),
            relation: params.relation,
            message: params.message,
        })
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }
}

impl Rule for CrossFieldRule {
    fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    fn phase(&self) -> Phase {
        Phase::CrossField
    }

    fn dependencies(&self) -> Vec<String> {
        let mut fields = self.definition.fields.clone();
        for field in self.relation.fields() {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }

    fn evaluate(&self, record: &Record, ctx: &EvalContext<'_>) -> Result<Option<Finding>> {
        CrossFieldValidator.evaluate(record, self, ctx)
    }
}

/// Evaluates relations and turns their outcome into findings.
///
/// A relation that cannot be resolved is skipped with an INFO finding.
/// Violations use the rule's configured severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossFieldValidator;

impl CrossFieldValidator {
    pub fn evaluate(
        &self,
        record: &Record,
        rule: &CrossFieldRule,
        ctx: &EvalContext<'_>,
    ) -> Result<Option<Finding>> {
        let definition = &rule.definition;
        let fields = rule.dependencies();

        let finding = match rule.relation.check(record, ctx.references) {
            Outcome::Holds => None,
            Outcome::Unresolvable(reason) => Some(
                Finding::new(
                    definition,
                    record.id(),
                    Phase::CrossField,
                    format!("cross-field check skipped: {}", reason),
                    ctx.detected_at,
                )
                .with_severity(Severity::Info)
                .with_fields(fields),
            ),
            Outcome::Violated {
                observed,
                expected,
                temporal,
            } => {
                let message = rule.message.clone().unwrap_or_else(|| {
                    if temporal {
                        format!("temporal inconsistency: expected {}", expected_text(&expected))
                    } else {
                        format!("cross-field relation violated: expected {}", expected_text(&expected))
                    }
                });
                Some(
                    Finding::new(definition, record.id(), Phase::CrossField, message, ctx.detected_at)
                        .with_fields(fields)
                        .with_evidence(Evidence::new().with_observed(observed).with_expected(expected)),
                )
            }
        };
        Ok(finding)
    }
}

fn expected_text(expected: &serde_json::Value) -> String {
    match expected {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
