//! Batch validation: gated phases, parallel records, ordered results.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::audit::AuditTrail;
use crate::config::EngineConfig;
use crate::error::{AssayError, Result};
use crate::record::{Ingested, Record, RecordBatch, ReferenceData};
use crate::result::{QcResult, ResultAggregator, RunInfo, RunStatus};
use crate::rules::{EvalContext, RuleRegistry};
use crate::stats::{BaselineSet, StatisticalAnomalyDetector};

use super::cancel::CancelToken;
use super::evaluator::{Check, Evaluator, unparseable_finding};
use super::finding::Finding;

/// Result of the schema and business pass for one batch entry.
enum FirstPass {
    Unparseable(Finding),
    Parsed {
        checks: Vec<Check>,
        failed_fields: Vec<String>,
    },
}

/// Per-rule index of the first record on which the rule failed or timed
/// out. Results of that rule on later records are discarded at merge time,
/// so the outcome does not depend on which worker noticed the failure first.
struct Disabled(Vec<AtomicUsize>);

impl Disabled {
    fn new(rules: usize) -> Self {
        Self((0..rules).map(|_| AtomicUsize::new(usize::MAX)).collect())
    }

    fn first_failure(&self, rule: usize) -> usize {
        self.0[rule].load(Ordering::Acquire)
    }

    /// Whether the rule is already known to be disabled at `position`.
    fn skips(&self, rule: usize, position: usize) -> bool {
        position > self.first_failure(rule)
    }

    fn record(&self, checks: &[Check], position: usize) {
        for check in checks.iter().filter(|c| c.outcome.disables()) {
            self.0[check.rule].fetch_min(position, Ordering::AcqRel);
        }
    }

    fn keeps(&self, check: &Check, position: usize) -> bool {
        position <= self.first_failure(check.rule)
    }
}

/// Validates record batches against a rule registry.
///
/// Records are evaluated in parallel on a dedicated worker pool. Schema
/// and business rules run first for every record; baselines are then
/// finalized, and only after that do statistical and cross-field rules
/// run. Findings come back in batch order, then rule order.
pub struct ValidationEngine {
    config: EngineConfig,
    detector: StatisticalAnomalyDetector,
    aggregator: ResultAggregator,
    audit: Option<Arc<AuditTrail>>,
    cancel: CancelToken,
    pool: rayon::ThreadPool,
}

impl ValidationEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("assay-worker-{}", i))
            .build()
            .map_err(|e| AssayError::config(format!("failed to start worker pool: {}", e)))?;

        Ok(Self {
            detector: StatisticalAnomalyDetector::new(config.detector.clone()),
            aggregator: ResultAggregator::new(config.weights.clone()),
            config,
            audit: None,
            cancel: CancelToken::new(),
            pool,
        })
    }

    /// Commit every run to an audit trail.
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Handle for cancelling runs of this engine from another thread.
    ///
    /// A cancelled token stays cancelled until [`CancelToken::reset`].
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detector(&self) -> &StatisticalAnomalyDetector {
        &self.detector
    }

    /// Validate a batch without reference data.
    ///
    /// When `baselines` is `None`, baselines are computed from this batch
    /// at the barrier between the business and statistical phases.
    pub fn validate(
        &self,
        batch: &RecordBatch,
        registry: &RuleRegistry,
        baselines: Option<&BaselineSet>,
    ) -> Result<QcResult> {
        self.validate_with(batch, registry, baselines, &ReferenceData::new())
    }

    /// Validate a batch with reference values available to cross-field
    /// rules.
    ///
    /// Only an audit write failure is returned as an error; rule failures
    /// and unparseable records become findings.
    pub fn validate_with(
        &self,
        batch: &RecordBatch,
        registry: &RuleRegistry,
        baselines: Option<&BaselineSet>,
        references: &ReferenceData,
    ) -> Result<QcResult> {
        let at = self.run_clock();
        let evaluator = Evaluator::new(registry, self.config.rule_timeout());
        let disabled = Disabled::new(registry.rules().len());
        let ctx = EvalContext::new(references, &self.detector, registry.cohorts(), at);
        let entries = batch.entries();

        tracing::info!(
            batch = batch.id(),
            records = entries.len(),
            rules = registry.rules().len(),
            ruleset = registry.version(),
            "starting validation run"
        );

        let first = self.first_pass(entries, &evaluator, &disabled, &ctx);

        let computed;
        let baselines = match baselines {
            Some(supplied) => supplied,
            None => {
                computed = self.barrier(entries, &first, registry, &disabled, at);
                &computed
            }
        };
        let ctx = ctx.with_baselines(baselines);

        let second: Vec<Option<Vec<Check>>> = self.pool.install(|| {
            first
                .par_iter()
                .enumerate()
                .map(|(i, slot)| match slot {
                    Some(FirstPass::Parsed { failed_fields, .. }) if !self.cancel.is_cancelled() => {
                        let record = entries[i].as_record()?;
                        let checks = evaluator.second_pass(record, &ctx, failed_fields, |rule| {
                            disabled.skips(rule, i)
                        });
                        disabled.record(&checks, i);
                        Some(checks)
                    }
                    _ => None,
                })
                .collect()
        });

        let cancelled = self.cancel.is_cancelled();
        let mut findings = Vec::new();
        let mut total_checks = 0;
        let mut records_evaluated = 0;

        for (i, (slot, tail)) in first.into_iter().zip(second).enumerate() {
            match slot {
                None => {}
                Some(FirstPass::Unparseable(finding)) => {
                    total_checks += 1;
                    records_evaluated += 1;
                    findings.push(finding);
                }
                Some(FirstPass::Parsed { checks, .. }) => {
                    if tail.is_some() {
                        records_evaluated += 1;
                    }
                    for check in checks.into_iter().chain(tail.into_iter().flatten()) {
                        if !disabled.keeps(&check, i) {
                            continue;
                        }
                        total_checks += 1;
                        if let Some(finding) = check.outcome.into_finding() {
                            findings.push(finding);
                        }
                    }
                }
            }
        }

        for (index, rule) in registry.rules().iter().enumerate() {
            let position = disabled.first_failure(index);
            if position != usize::MAX {
                tracing::warn!(
                    rule = %rule.definition().id,
                    record = entries[position].record_id(),
                    "rule disabled for the rest of the run"
                );
            }
        }

        let status = if cancelled && records_evaluated < entries.len() {
            RunStatus::Incomplete
        } else {
            RunStatus::Complete
        };

        let mut result = self.aggregator.aggregate(
            findings,
            total_checks,
            RunInfo {
                run_id: None,
                ruleset_version: registry.version().to_string(),
                ruleset_digest: registry.digest().to_string(),
                batch_id: batch.id().to_string(),
                status,
                records_total: entries.len(),
                records_evaluated,
            },
        );

        if let Some(ref audit) = self.audit {
            result.run_id = Some(audit.commit_run(&result, &self.config.actor)?);
        }

        tracing::info!(
            batch = batch.id(),
            run_id = ?result.run_id,
            status = ?result.status,
            findings = result.findings.len(),
            checks = result.total_checks,
            score = result.score,
            "validation run finished"
        );
        Ok(result)
    }

    /// Compute baselines for a batch the way a run would at its barrier,
    /// without producing a result.
    pub fn compute_baselines(
        &self,
        batch: &RecordBatch,
        registry: &RuleRegistry,
        references: &ReferenceData,
    ) -> BaselineSet {
        let at = self.run_clock();
        let evaluator = Evaluator::new(registry, self.config.rule_timeout());
        let disabled = Disabled::new(registry.rules().len());
        let ctx = EvalContext::new(references, &self.detector, registry.cohorts(), at);

        let first = self.first_pass(batch.entries(), &evaluator, &disabled, &ctx);
        self.barrier(batch.entries(), &first, registry, &disabled, at)
    }

    fn run_clock(&self) -> DateTime<Utc> {
        self.config.run_timestamp.unwrap_or_else(Utc::now)
    }

    /// Schema and business rules for every entry. `None` marks entries
    /// skipped after cancellation.
    fn first_pass(
        &self,
        entries: &[Ingested],
        evaluator: &Evaluator<'_>,
        disabled: &Disabled,
        ctx: &EvalContext<'_>,
    ) -> Vec<Option<FirstPass>> {
        let duplicates = duplicate_positions(entries);

        self.pool.install(|| {
            entries
                .par_iter()
                .enumerate()
                .map(|(i, entry)| {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    let pass = match entry {
                        Ingested::Unparseable { record_id, reason } => {
                            let position = record_id.is_empty().then_some(i);
                            FirstPass::Unparseable(unparseable_finding(
                                record_id,
                                reason,
                                position,
                                ctx.detected_at,
                            ))
                        }
                        Ingested::Parsed(record) if duplicates.contains(&i) => {
                            FirstPass::Unparseable(unparseable_finding(
                                record.id(),
                                "duplicate record id",
                                Some(i),
                                ctx.detected_at,
                            ))
                        }
                        Ingested::Parsed(record) => {
                            let mut failed_fields = Vec::new();
                            let checks = evaluator.first_pass(record, ctx, &mut failed_fields, |rule| {
                                disabled.skips(rule, i)
                            });
                            disabled.record(&checks, i);
                            FirstPass::Parsed {
                                checks,
                                failed_fields,
                            }
                        }
                    };
                    Some(pass)
                })
                .collect()
        })
    }

    /// Finalize baselines from records that passed the first phases
    /// without ERROR or CRITICAL findings.
    fn barrier(
        &self,
        entries: &[Ingested],
        first: &[Option<FirstPass>],
        registry: &RuleRegistry,
        disabled: &Disabled,
        at: DateTime<Utc>,
    ) -> BaselineSet {
        let targets = registry.baseline_targets();
        if targets.is_empty() {
            return BaselineSet::new();
        }

        let snapshot: Vec<&Record> = entries
            .iter()
            .zip(first)
            .enumerate()
            .filter_map(|(i, (entry, slot))| match slot {
                Some(FirstPass::Parsed { checks, .. }) => {
                    let clean = checks
                        .iter()
                        .filter(|c| disabled.keeps(c, i))
                        .filter_map(|c| c.outcome.finding())
                        .all(|f| !f.severity.is_failure());
                    if clean { entry.as_record() } else { None }
                }
                _ => None,
            })
            .collect();

        let set = BaselineSet::compute(snapshot.iter().copied(), &targets, registry.cohorts(), &self.detector, at);

        let thin = set.iter().filter(|b| !self.detector.is_usable(b, None)).count();
        if thin > 0 {
            tracing::warn!(
                cohorts = thin,
                min_samples = self.detector.config().min_samples,
                "some baselines have too few samples; statistical rules fall back for them"
            );
        }
        tracing::debug!(records = snapshot.len(), baselines = set.len(), "baseline barrier reached");
        set
    }
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("config", &self.config)
            .field("audit", &self.audit.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Positions of parsed records whose id already appeared earlier in the
/// batch. The first occurrence is evaluated; later ones are unparseable.
fn duplicate_positions(entries: &[Ingested]) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();
    for (i, entry) in entries.iter().enumerate() {
        let id = entry.record_id();
        if id.is_empty() {
            continue;
        }
        if !seen.insert(id) && matches!(entry, Ingested::Parsed(_)) {
            duplicates.insert(i);
        }
    }
    duplicates
}
