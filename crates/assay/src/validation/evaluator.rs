//! Per-record rule evaluation shared by batch and streaming validation.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::record::Record;
use crate::rules::{EvalContext, Rule, RuleDefinition, RuleRegistry};

use super::finding::{Evidence, Finding, Phase, Severity};

/// Message of the finding recorded when a rule exceeds its budget.
pub const TIMEOUT_MESSAGE: &str = "rule evaluation timeout";
/// Prefix of the finding recorded when a rule errors or panics.
pub const FAILURE_MESSAGE: &str = "rule execution failed";

/// Message prefix of the finding emitted for an entry that could not be parsed.
pub const UNPARSEABLE_MESSAGE: &str = "unparseable record";

/// The single CRITICAL finding for an unparseable entry. `position` tags the
/// id when the record id alone would not be unique within the run.
pub(crate) fn unparseable_finding(
    record_id: &str,
    reason: &str,
    position: Option<usize>,
    detected_at: DateTime<Utc>,
) -> Finding {
    let mut finding = Finding::new(
        RuleDefinition::unparseable(),
        record_id,
        Phase::Schema,
        format!("{}: {}", UNPARSEABLE_MESSAGE, reason),
        detected_at,
    )
    .with_severity(Severity::Critical)
    .with_evidence(Evidence::new().with_observed(json!({"reason": reason})));
    if let Some(position) = position {
        finding.id = format!("{}#{}", finding.id, position);
    }
    finding
}

/// Outcome of one rule against one record.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Pass,
    Finding(Finding),
    /// The rule returned an error or panicked.
    Failed(Finding),
    TimedOut(Finding),
}

impl Outcome {
    /// Whether the rule must be disabled for the rest of the run.
    pub fn disables(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::TimedOut(_))
    }

    pub fn finding(&self) -> Option<&Finding> {
        match self {
            Outcome::Pass => None,
            Outcome::Finding(f) | Outcome::Failed(f) | Outcome::TimedOut(f) => Some(f),
        }
    }

    pub fn into_finding(self) -> Option<Finding> {
        match self {
            Outcome::Pass => None,
            Outcome::Finding(f) | Outcome::Failed(f) | Outcome::TimedOut(f) => Some(f),
        }
    }
}

/// One evaluated rule; `rule` indexes [`RuleRegistry::rules`].
#[derive(Debug, Clone)]
pub(crate) struct Check {
    pub rule: usize,
    pub outcome: Outcome,
}

/// Evaluation plan for one registry: rule order, dependencies and budget.
pub(crate) struct Evaluator<'a> {
    rules: &'a [Box<dyn Rule>],
    dependencies: Vec<Vec<String>>,
    budget: Duration,
    /// Schema and business rules, in evaluation order.
    first: Vec<usize>,
    /// Statistical and cross-field rules, in evaluation order.
    second: Vec<usize>,
}

impl<'a> Evaluator<'a> {
    pub fn new(registry: &'a RuleRegistry, budget: Duration) -> Self {
        let rules = registry.rules();
        let (first, second): (Vec<usize>, Vec<usize>) = (0..rules.len())
            .partition(|&i| matches!(rules[i].phase(), Phase::Schema | Phase::Business));

        Self {
            rules,
            dependencies: rules.iter().map(|r| r.dependencies()).collect(),
            budget,
            first,
            second,
        }
    }

    pub fn rule(&self, index: usize) -> &dyn Rule {
        self.rules[index].as_ref()
    }

    /// Schema then business rules. Fields failing their schema check are
    /// appended to `failed_fields`.
    pub fn first_pass(
        &self,
        record: &Record,
        ctx: &EvalContext<'_>,
        failed_fields: &mut Vec<String>,
        skip: impl Fn(usize) -> bool,
    ) -> Vec<Check> {
        self.pass(&self.first, record, ctx, failed_fields, skip)
    }

    /// Statistical then cross-field rules, after the baseline barrier.
    pub fn second_pass(
        &self,
        record: &Record,
        ctx: &EvalContext<'_>,
        failed_fields: &[String],
        skip: impl Fn(usize) -> bool,
    ) -> Vec<Check> {
        let mut failed = failed_fields.to_vec();
        self.pass(&self.second, record, ctx, &mut failed, skip)
    }

    fn pass(
        &self,
        plan: &[usize],
        record: &Record,
        ctx: &EvalContext<'_>,
        failed_fields: &mut Vec<String>,
        skip: impl Fn(usize) -> bool,
    ) -> Vec<Check> {
        let mut checks = Vec::with_capacity(plan.len());
        for &index in plan {
            if skip(index) {
                continue;
            }
            // A schema failure on a field silences every rule that depends on it.
            if self.dependencies[index].iter().any(|d| failed_fields.contains(d)) {
                continue;
            }

            let check = self.run(index, record, ctx);
            if self.rules[index].phase() == Phase::Schema {
                if let Some(finding) = check.outcome.finding() {
                    failed_fields.extend(finding.fields.iter().cloned());
                }
            }
            checks.push(check);
        }
        checks
    }

    /// Evaluate one rule, containing panics.
    ///
    /// The budget is enforced after the rule returns: an evaluation that ran
    /// longer than the budget is discarded and reported as a timeout. A rule
    /// that never returns holds its worker and is not preempted by
    /// cancellation.
    fn run(&self, index: usize, record: &Record, ctx: &EvalContext<'_>) -> Check {
        let rule = self.rules[index].as_ref();
        let definition = rule.definition();

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(record, ctx)));
        let elapsed = started.elapsed();

        let outcome = if elapsed > self.budget {
            Outcome::TimedOut(
                Finding::new(definition, record.id(), rule.phase(), TIMEOUT_MESSAGE, ctx.detected_at)
                    .with_severity(Severity::Critical)
                    .with_evidence(
                        Evidence::new()
                            .with_observed(json!({"elapsed_ms": elapsed.as_millis() as u64}))
                            .with_expected(json!({"budget_ms": self.budget.as_millis() as u64})),
                    ),
            )
        } else {
            match result {
                Ok(Ok(Some(finding))) => Outcome::Finding(finding),
                Ok(Ok(None)) => Outcome::Pass,
                Ok(Err(e)) => Outcome::Failed(
                    Finding::new(
                        definition,
                        record.id(),
                        rule.phase(),
                        format!("{}: {}", FAILURE_MESSAGE, e),
                        ctx.detected_at,
                    )
                    .with_severity(Severity::Error),
                ),
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "panic".to_string());
                    Outcome::Failed(
                        Finding::new(
                            definition,
                            record.id(),
                            rule.phase(),
                            format!("{}: {}", FAILURE_MESSAGE, reason),
                            ctx.detected_at,
                        )
                        .with_severity(Severity::Error),
                    )
                }
            }
        };

        Check { rule: index, outcome }
    }
}
