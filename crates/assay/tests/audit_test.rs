//! Audit trail tests: ordering under concurrency, durability failures,
//! remediation lineage and tamper detection.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{DateTime, Utc};

use assay::audit::{EntryIter, VerifyReport};
use assay::{
    AssayError, AuditEntry, AuditEvent, AuditFilter, AuditSink, AuditTrail, EngineConfig, Finding, JsonlSink,
    MemorySink, Phase, Record, RecordBatch, RemediationStatus, RuleDefinition, RuleRegistry, RuleSetDocument,
    Severity, ValidationEngine,
};

const RULES: &str = r#"{
    "version": "labs-7",
    "fields": [{"name": "potassium", "type": "float", "required": true}],
    "rules": [
        {"id": "labs.potassium_range", "domain": "labs", "field": "potassium", "kind": "range",
         "parameters": {"min": 2.5, "max": 6.5}, "severity": "CRITICAL"}
    ]
}"#;

fn registry() -> RuleRegistry {
    RuleRegistry::load(RuleSetDocument::from_json(RULES).unwrap()).unwrap()
}

fn engine() -> ValidationEngine {
    let at = DateTime::<Utc>::from_timestamp(1_772_000_000, 0).unwrap();
    ValidationEngine::new(EngineConfig::default().with_workers(2).with_run_timestamp(at)).unwrap()
}

fn labs(values: &[f64]) -> RecordBatch {
    RecordBatch::from_records(
        "labs",
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Record::new(format!("lab-{}", i), "labs").with("potassium", *v)),
    )
}

fn finding(n: usize) -> Finding {
    let definition = registry().active("labs.potassium_range").unwrap().clone();
    Finding::new(
        &definition,
        &format!("lab-{}", n),
        Phase::Business,
        "out of range",
        DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
    )
}

fn entries(trail: &AuditTrail) -> Vec<AuditEntry> {
    trail.query(AuditFilter::new()).unwrap().map(|e| e.unwrap()).collect()
}

/// Sink that accepts a fixed number of appends, then fails.
struct FlakySink {
    inner: MemorySink,
    remaining: AtomicUsize,
}

impl FlakySink {
    fn new(capacity: usize) -> Self {
        Self {
            inner: MemorySink::new(),
            remaining: AtomicUsize::new(capacity),
        }
    }
}

impl AuditSink for FlakySink {
    fn append(&self, entry: &AuditEntry) -> io::Result<()> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        self.inner.append(entry)
    }

    fn scan(&self) -> assay::Result<EntryIter<'_>> {
        self.inner.scan()
    }
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_concurrent_appends_to_one_run() {
    let trail = Arc::new(AuditTrail::in_memory());
    let run_id = trail.begin_run();
    let barrier = Arc::new(Barrier::new(10));

    let handles: Vec<_> = (0..10)
        .map(|t| {
            let trail = trail.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..10 {
                    trail
                        .append(run_id, "worker", "labs-7", AuditEvent::Finding(finding(t * 10 + i)))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = entries(&trail);
    assert_eq!(stored.len(), 100);
    assert!(stored.iter().all(|e| e.run_id == run_id));
    let ids: Vec<u64> = stored.iter().map(|e| e.entry_id).collect();
    assert_eq!(ids, (1..=100).collect::<Vec<u64>>());

    let report = trail.verify().unwrap();
    assert_eq!(report.entries, 100);
    assert_eq!(report.last_run, Some(run_id));
}

#[test]
fn test_concurrent_runs_do_not_interleave() {
    let trail = Arc::new(AuditTrail::in_memory());
    let engine = Arc::new(engine().with_audit(trail.clone()));
    let registry = Arc::new(registry());

    let handles: Vec<_> = (0..6)
        .map(|t| {
            let engine = engine.clone();
            let registry = registry.clone();
            thread::spawn(move || {
                let batch = labs(&[4.0, 7.0 + t as f64, 1.0]);
                engine.validate(&batch, &registry, None).unwrap().run_id.unwrap()
            })
        })
        .collect();
    let mut run_ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    run_ids.sort_unstable();
    assert_eq!(run_ids, (1..=6).collect::<Vec<u64>>());

    let stored = entries(&trail);
    // RunStarted + 2 findings + RunCompleted per run.
    assert_eq!(stored.len(), 6 * 4);
    for run in stored.chunks(4) {
        let run_id = run[0].run_id;
        assert!(run.iter().all(|e| e.run_id == run_id));
        assert_eq!(run[0].event.kind(), "run_started");
        assert_eq!(run[3].event.kind(), "run_completed");
    }
    assert!(stored.windows(2).all(|w| w[0].run_id <= w[1].run_id));
    assert!(trail.verify().is_ok());
}

#[test]
fn test_append_rejects_stale_or_unknown_run() {
    let trail = AuditTrail::in_memory();
    let first = trail.begin_run();
    let second = trail.begin_run();
    trail
        .append(second, "system", "labs-7", AuditEvent::Finding(finding(1)))
        .unwrap();

    let stale = trail.append(first, "system", "labs-7", AuditEvent::Finding(finding(2)));
    assert!(matches!(stale, Err(AssayError::AuditIntegrity { .. })));
    let unknown = trail.append(99, "system", "labs-7", AuditEvent::Finding(finding(3)));
    assert!(matches!(unknown, Err(AssayError::AuditIntegrity { .. })));
}

// =============================================================================
// Durability
// =============================================================================

#[test]
fn test_audit_write_failure_is_fatal_with_context() {
    let trail = Arc::new(AuditTrail::open(FlakySink::new(2)).unwrap());
    let engine = engine().with_audit(trail.clone());

    let err = engine
        .validate(&labs(&[9.0, 9.5, 1.0]), &registry(), None)
        .unwrap_err();
    match err {
        AssayError::AuditWrite { run_id, last_entry, .. } => {
            assert_eq!(run_id, 1);
            assert_eq!(last_entry, Some(2));
        }
        other => panic!("expected AuditWrite, got {:?}", other),
    }
    assert_eq!(trail.last_entry(), Some(2));

    // Entries already appended remain valid.
    assert_eq!(trail.verify().unwrap().entries, 2);

    // The trail refuses to continue silently.
    let again = engine.validate(&labs(&[4.0]), &registry(), None);
    assert!(matches!(again, Err(AssayError::AuditWrite { .. })));
}

#[test]
fn test_jsonl_ledger_resumes_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    {
        let trail = Arc::new(AuditTrail::open(JsonlSink::open(&path).unwrap()).unwrap());
        let result = engine()
            .with_audit(trail)
            .validate(&labs(&[1.0, 4.0]), &registry(), None)
            .unwrap();
        assert_eq!(result.run_id, Some(1));
    }

    let trail = Arc::new(AuditTrail::open(JsonlSink::open(&path).unwrap()).unwrap());
    let result = engine()
        .with_audit(trail.clone())
        .validate(&labs(&[8.0]), &registry(), None)
        .unwrap();
    assert_eq!(result.run_id, Some(2));

    let VerifyReport { entries, last_run, .. } = trail.verify().unwrap();
    assert_eq!(entries, 6);
    assert_eq!(last_run, Some(2));
}

#[test]
fn test_tampered_ledger_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    {
        let trail = Arc::new(AuditTrail::open(JsonlSink::open(&path).unwrap()).unwrap());
        engine()
            .with_audit(trail)
            .validate(&labs(&[1.0, 9.0]), &registry(), None)
            .unwrap();
    }

    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replacen("CRITICAL", "INFO", 1)).unwrap();

    let err = AuditTrail::open(JsonlSink::open(&path).unwrap()).err().unwrap();
    assert!(matches!(err, AssayError::AuditIntegrity { entry_id: 2, .. }));
}

// =============================================================================
// Remediation and Queries
// =============================================================================

#[test]
fn test_remediation_is_linked_not_edited() {
    let trail = Arc::new(AuditTrail::in_memory());
    let result = engine()
        .with_audit(trail.clone())
        .validate(&labs(&[1.9, 4.2]), &registry(), None)
        .unwrap();
    let run_id = result.run_id.unwrap();
    let finding_id = result.findings[0].id.clone();
    let before = entries(&trail);

    trail
        .remediate(run_id, &finding_id, RemediationStatus::Acknowledged, "dr.osei", Some("redraw ordered"))
        .unwrap();
    trail
        .remediate(run_id, &finding_id, RemediationStatus::Resolved, "dr.osei", None)
        .unwrap();

    assert_eq!(trail.status_of(run_id, &finding_id).unwrap(), Some(RemediationStatus::Resolved));

    let after = entries(&trail);
    assert_eq!(&after[..before.len()], &before[..]);
    let original = after
        .iter()
        .find_map(|e| e.event.finding().filter(|f| f.id == finding_id))
        .unwrap();
    assert_eq!(original.status, RemediationStatus::Open);

    let history: Vec<AuditEntry> = trail
        .query(AuditFilter::new().finding(finding_id.as_str()))
        .unwrap()
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(history.len(), 3);
    assert!(history[1].run_id > run_id);
    assert_eq!(history[2].actor, "dr.osei");

    let backwards = trail.remediate(run_id, &finding_id, RemediationStatus::Open, "dr.osei", None);
    assert!(matches!(backwards, Err(AssayError::Remediation(_))));
    let missing = trail.remediate(run_id, "no-such-finding", RemediationStatus::Resolved, "dr.osei", None);
    assert!(matches!(missing, Err(AssayError::Remediation(_))));
}

#[test]
fn test_query_filters() {
    let trail = Arc::new(AuditTrail::in_memory());
    let engine = engine().with_audit(trail.clone());
    engine.validate(&labs(&[1.0, 4.0]), &registry(), None).unwrap();
    engine.validate(&labs(&[7.0, 8.0, 4.0]), &registry(), None).unwrap();

    let second_run: Vec<AuditEntry> = trail
        .query(AuditFilter::new().run(2))
        .unwrap()
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(second_run.len(), 4);

    let critical = trail
        .query(AuditFilter::new().min_severity(Severity::Critical))
        .unwrap()
        .count();
    assert_eq!(critical, 3);

    let by_rule = trail
        .query(AuditFilter::new().runs(1, 1).rule("labs.potassium_range"))
        .unwrap()
        .count();
    assert_eq!(by_rule, 1);

    let before_epoch = trail
        .query(AuditFilter::new().between(None, DateTime::<Utc>::from_timestamp(0, 0)))
        .unwrap()
        .count();
    assert_eq!(before_epoch, 0);
}

#[test]
fn test_every_finding_resolves_to_its_rule_revision() {
    let trail = Arc::new(AuditTrail::in_memory());
    let registry = registry();
    engine()
        .with_audit(trail.clone())
        .validate(&labs(&[1.0, 9.0]), &registry, None)
        .unwrap();

    for entry in entries(&trail) {
        if let Some(f) = entry.event.finding() {
            let definition: &RuleDefinition = registry.definition(&f.rule_id, f.rule_version).unwrap();
            assert_eq!(entry.ruleset_version, registry.version());
            assert_eq!(definition.severity, f.severity);
        }
    }
}
