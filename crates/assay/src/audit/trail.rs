//! The append-only audit trail.

use std::fmt;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AssayError, Result};
use crate::result::QcResult;
use crate::validation::{RemediationStatus, Severity};

use super::entry::{AuditEntry, AuditEvent, GENESIS_HASH};
use super::sink::{AuditSink, MemorySink};

/// Filter for [`AuditTrail::query`]. Unset fields match everything.
///
/// `severity` keeps finding entries at or above the given level and drops
/// every other event. `rule_id` and `finding_id` keep finding and
/// remediation entries that concern the given rule or finding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub run_from: Option<u64>,
    pub run_to: Option<u64>,
    pub severity: Option<Severity>,
    pub rule_id: Option<String>,
    pub finding_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive run id range.
    pub fn runs(mut self, from: u64, to: u64) -> Self {
        self.run_from = Some(from);
        self.run_to = Some(to);
        self
    }

    pub fn run(self, run_id: u64) -> Self {
        self.runs(run_id, run_id)
    }

    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn finding(mut self, finding_id: impl Into<String>) -> Self {
        self.finding_id = Some(finding_id.into());
        self
    }

    /// Inclusive timestamp range.
    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.run_from.is_some_and(|r| entry.run_id < r) || self.run_to.is_some_and(|r| entry.run_id > r) {
            return false;
        }
        if self.since.is_some_and(|t| entry.timestamp < t) || self.until.is_some_and(|t| entry.timestamp > t) {
            return false;
        }
        if let Some(min) = self.severity {
            if !entry.event.severity().is_some_and(|s| s >= min) {
                return false;
            }
        }
        if let Some(ref rule) = self.rule_id {
            if entry.event.rule_id() != Some(rule.as_str()) {
                return false;
            }
        }
        if let Some(ref finding) = self.finding_id {
            if entry.event.finding_id() != Some(finding.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Outcome of a successful [`AuditTrail::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub entries: u64,
    pub last_run: Option<u64>,
    pub head_hash: String,
}

#[derive(Debug)]
struct WriterState {
    next_entry: u64,
    last_durable_entry: Option<u64>,
    last_allocated_run: u64,
    last_appended_run: Option<u64>,
    head_hash: String,
    /// Set after a failed write; the trail refuses further appends.
    failed: bool,
}

impl WriterState {
    fn fresh() -> Self {
        Self {
            next_entry: 1,
            last_durable_entry: None,
            last_allocated_run: 0,
            last_appended_run: None,
            head_hash: GENESIS_HASH.to_string(),
            failed: false,
        }
    }
}

/// Append-only, hash-chained ledger of runs, findings and remediations.
///
/// All writes go through a single writer lock, so entries of concurrent
/// runs never interleave and run ids never decrease in ledger order.
pub struct AuditTrail {
    sink: Box<dyn AuditSink>,
    state: Mutex<WriterState>,
}

impl AuditTrail {
    /// Open a trail over a sink, resuming from whatever it already holds.
    ///
    /// The existing ledger is verified first; a broken chain is refused.
    pub fn open(sink: impl AuditSink + 'static) -> Result<Self> {
        let trail = Self {
            sink: Box::new(sink),
            state: Mutex::new(WriterState::fresh()),
        };
        let report = trail.verify()?;
        {
            let mut state = trail.lock();
            state.next_entry = report.entries + 1;
            state.last_durable_entry = (report.entries > 0).then_some(report.entries);
            state.last_allocated_run = report.last_run.unwrap_or(0);
            state.last_appended_run = report.last_run;
            state.head_hash = report.head_hash;
        }
        tracing::debug!(entries = report.entries, "opened audit trail");
        Ok(trail)
    }

    /// A trail over a fresh in-memory sink.
    pub fn in_memory() -> Self {
        Self {
            sink: Box::new(MemorySink::new()),
            state: Mutex::new(WriterState::fresh()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a new run id, greater than every id allocated before.
    pub fn begin_run(&self) -> u64 {
        let mut state = self.lock();
        state.last_allocated_run += 1;
        state.last_allocated_run
    }

    /// Id of the last durably appended entry.
    pub fn last_entry(&self) -> Option<u64> {
        self.lock().last_durable_entry
    }

    /// Append one entry for an allocated run. Returns the new entry id.
    ///
    /// Appending for a run older than the newest run already in the ledger
    /// is refused, as is appending for a run id that was never allocated.
    pub fn append(&self, run_id: u64, actor: &str, ruleset_version: &str, event: AuditEvent) -> Result<u64> {
        let mut state = self.lock();
        Self::check_run(&state, run_id)?;
        self.write(&mut state, run_id, actor, ruleset_version, event)
    }

    /// Record a whole run as one transaction: `RunStarted`, every finding in
    /// order, then `RunCompleted`. Returns the run id allocated for it.
    pub fn commit_run(&self, result: &QcResult, actor: &str) -> Result<u64> {
        let mut state = self.lock();
        state.last_allocated_run += 1;
        let run_id = state.last_allocated_run;
        let version = result.ruleset_version.as_str();

        self.write(
            &mut state,
            run_id,
            actor,
            version,
            AuditEvent::RunStarted {
                batch_id: result.batch_id.clone(),
                record_count: result.records_total,
                ruleset_digest: result.ruleset_digest.clone(),
            },
        )?;
        for finding in &result.findings {
            self.write(&mut state, run_id, actor, version, AuditEvent::Finding(finding.clone()))?;
        }
        self.write(
            &mut state,
            run_id,
            actor,
            version,
            AuditEvent::RunCompleted {
                status: result.status,
                score: result.score,
                finding_count: result.findings.len(),
                total_checks: result.total_checks,
            },
        )?;

        tracing::info!(
            run_id,
            findings = result.findings.len(),
            score = result.score,
            "committed run to audit trail"
        );
        Ok(run_id)
    }

    /// Record a remediation status change for a finding of an earlier run.
    ///
    /// The change is appended as a new entry under a fresh run id; the
    /// original finding entry is never touched. Returns the new entry id.
    pub fn remediate(
        &self,
        finding_run: u64,
        finding_id: &str,
        to: RemediationStatus,
        actor: &str,
        note: Option<&str>,
    ) -> Result<u64> {
        let mut state = self.lock();

        let mut origin: Option<(String, String)> = None;
        let mut current = RemediationStatus::Open;
        for entry in self.sink.scan()? {
            let entry = entry?;
            match entry.event {
                AuditEvent::Finding(ref f) if entry.run_id == finding_run && f.id == finding_id => {
                    current = f.status;
                    origin = Some((f.rule_id.clone(), entry.ruleset_version.clone()));
                }
                AuditEvent::Remediation {
                    finding_id: ref id,
                    finding_run: run,
                    to: status,
                    ..
                } if run == finding_run && id == finding_id => current = status,
                _ => {}
            }
        }

        let Some((rule_id, version)) = origin else {
            return Err(AssayError::Remediation(format!(
                "no finding '{}' in run {}",
                finding_id, finding_run
            )));
        };
        if !current.can_transition_to(to) {
            return Err(AssayError::Remediation(format!(
                "finding '{}' cannot move from {} to {}",
                finding_id, current, to
            )));
        }

        state.last_allocated_run += 1;
        let run_id = state.last_allocated_run;
        self.write(
            &mut state,
            run_id,
            actor,
            &version,
            AuditEvent::Remediation {
                finding_id: finding_id.to_string(),
                finding_run,
                rule_id,
                from: current,
                to,
                note: note.map(String::from),
            },
        )
    }

    /// Current remediation status of a finding, folding in every linked
    /// remediation entry.
    pub fn status_of(&self, finding_run: u64, finding_id: &str) -> Result<Option<RemediationStatus>> {
        let mut status = None;
        for entry in self.sink.scan()? {
            let entry = entry?;
            match entry.event {
                AuditEvent::Finding(ref f) if entry.run_id == finding_run && f.id == finding_id => {
                    status = Some(f.status);
                }
                AuditEvent::Remediation {
                    finding_id: ref id,
                    finding_run: run,
                    to,
                    ..
                } if run == finding_run && id == finding_id => status = Some(to),
                _ => {}
            }
        }
        Ok(status)
    }

    /// Lazily iterate entries matching a filter, in ledger order.
    pub fn query(&self, filter: AuditFilter) -> Result<impl Iterator<Item = Result<AuditEntry>> + '_> {
        Ok(self.sink.scan()?.filter(move |entry| match entry {
            Ok(e) => filter.matches(e),
            Err(_) => true,
        }))
    }

    /// Check the whole ledger: hash chain, entry numbering and run ordering.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut expected_id = 1;
        let mut last_run: Option<u64> = None;
        let mut head = GENESIS_HASH.to_string();

        for entry in self.sink.scan()? {
            let entry = entry?;
            let violation = |message: String| AssayError::AuditIntegrity {
                entry_id: entry.entry_id,
                message,
            };

            if entry.entry_id != expected_id {
                return Err(violation(format!("expected entry id {}", expected_id)));
            }
            if last_run.is_some_and(|r| entry.run_id < r) {
                return Err(violation(format!("run id {} after run {:?}", entry.run_id, last_run)));
            }
            if entry.prev_hash != head {
                return Err(violation("previous hash does not match the chain".to_string()));
            }
            if entry.compute_hash()? != entry.hash {
                return Err(violation("content does not match its hash".to_string()));
            }

            expected_id += 1;
            last_run = Some(entry.run_id);
            head = entry.hash;
        }

        Ok(VerifyReport {
            entries: expected_id - 1,
            last_run,
            head_hash: head,
        })
    }

    fn check_run(state: &WriterState, run_id: u64) -> Result<()> {
        if run_id == 0 || run_id > state.last_allocated_run {
            return Err(AssayError::AuditIntegrity {
                entry_id: state.next_entry,
                message: format!("run id {} was never allocated", run_id),
            });
        }
        if state.last_appended_run.is_some_and(|last| run_id < last) {
            return Err(AssayError::AuditIntegrity {
                entry_id: state.next_entry,
                message: format!(
                    "run id {} is older than run {:?} already in the ledger",
                    run_id, state.last_appended_run
                ),
            });
        }
        Ok(())
    }

    fn write(
        &self,
        state: &mut WriterState,
        run_id: u64,
        actor: &str,
        ruleset_version: &str,
        event: AuditEvent,
    ) -> Result<u64> {
        if state.failed {
            return Err(AssayError::AuditWrite {
                run_id,
                last_entry: state.last_durable_entry,
                source: io::Error::other("audit trail is unavailable after an earlier write failure"),
            });
        }

        let entry = AuditEntry::seal(state.next_entry, run_id, actor, ruleset_version, event, &state.head_hash)?;
        if let Err(source) = self.sink.append(&entry) {
            state.failed = true;
            tracing::error!(
                run_id,
                last_entry = ?state.last_durable_entry,
                error = %source,
                "audit append failed"
            );
            return Err(AssayError::AuditWrite {
                run_id,
                last_entry: state.last_durable_entry,
                source,
            });
        }

        state.next_entry += 1;
        state.last_durable_entry = Some(entry.entry_id);
        state.last_appended_run = Some(run_id);
        state.head_hash = entry.hash;
        Ok(entry.entry_id)
    }
}

impl fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("AuditTrail")
            .field("next_entry", &state.next_entry)
            .field("last_run", &state.last_allocated_run)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ResultAggregator, RunInfo, RunStatus};
    use crate::rules::RuleDefinition;
    use crate::validation::{Finding, Phase};
    use serde_json::json;

    fn finding(record: &str, severity: Severity) -> Finding {
        let definition: RuleDefinition = serde_json::from_value(json!({
            "id": "age.range", "domain": "demographics", "field": "age",
            "kind": "range", "severity": severity
        }))
        .unwrap();
        Finding::new(&definition, record, Phase::Business, "age out of range", Utc::now())
    }

    fn result(findings: Vec<Finding>) -> QcResult {
        ResultAggregator::default().aggregate(
            findings,
            10,
            RunInfo {
                run_id: None,
                ruleset_version: "r1".to_string(),
                ruleset_digest: "sha256:00".to_string(),
                batch_id: "b".to_string(),
                status: RunStatus::Complete,
                records_total: 5,
                records_evaluated: 5,
            },
        )
    }

    #[test]
    fn test_commit_run_layout() {
        let trail = AuditTrail::in_memory();
        let run = trail
            .commit_run(&result(vec![finding("r1", Severity::Error), finding("r2", Severity::Warning)]), "system")
            .unwrap();
        assert_eq!(run, 1);

        let kinds: Vec<&'static str> = trail
            .query(AuditFilter::new())
            .unwrap()
            .map(|e| e.unwrap().event.kind())
            .collect();
        assert_eq!(kinds, vec!["run_started", "finding", "finding", "run_completed"]);
        assert_eq!(trail.verify().unwrap().entries, 4);
    }

    #[test]
    fn test_query_filters() {
        let trail = AuditTrail::in_memory();
        trail.commit_run(&result(vec![finding("r1", Severity::Warning)]), "system").unwrap();
        trail.commit_run(&result(vec![finding("r2", Severity::Critical)]), "system").unwrap();

        let errors: Vec<AuditEntry> = trail
            .query(AuditFilter::new().min_severity(Severity::Error))
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].run_id, 2);

        let first_run = trail.query(AuditFilter::new().run(1)).unwrap().count();
        assert_eq!(first_run, 3);
    }

    #[test]
    fn test_append_rules() {
        let trail = AuditTrail::in_memory();
        let event = AuditEvent::Finding(finding("r1", Severity::Info));
        assert!(trail.append(1, "system", "r1", event.clone()).is_err());

        let old = trail.begin_run();
        let new = trail.begin_run();
        trail.append(new, "system", "r1", event.clone()).unwrap();
        assert!(matches!(
            trail.append(old, "system", "r1", event),
            Err(AssayError::AuditIntegrity { .. })
        ));
    }

    #[test]
    fn test_remediation_lifecycle() {
        let trail = AuditTrail::in_memory();
        let f = finding("r1", Severity::Error);
        let run = trail.commit_run(&result(vec![f.clone()]), "system").unwrap();

        trail
            .remediate(run, &f.id, RemediationStatus::Acknowledged, "analyst", Some("looking"))
            .unwrap();
        assert_eq!(trail.status_of(run, &f.id).unwrap(), Some(RemediationStatus::Acknowledged));

        assert!(matches!(
            trail.remediate(run, &f.id, RemediationStatus::Open, "analyst", None),
            Err(AssayError::Remediation(_))
        ));
        trail.remediate(run, &f.id, RemediationStatus::Resolved, "analyst", None).unwrap();
        assert!(trail.remediate(run, &f.id, RemediationStatus::Resolved, "analyst", None).is_err());
        assert!(trail.remediate(run, "missing", RemediationStatus::Resolved, "analyst", None).is_err());

        // The original finding entry is untouched.
        let original: Vec<AuditEntry> = trail
            .query(AuditFilter::new().run(run).finding(f.id.clone()))
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(original.len(), 1);
        assert_eq!(original[0].event.finding().unwrap().status, RemediationStatus::Open);

        let linked = trail.query(AuditFilter::new().finding(f.id.clone())).unwrap().count();
        assert_eq!(linked, 3);
        assert!(trail.verify().is_ok());
    }
}
