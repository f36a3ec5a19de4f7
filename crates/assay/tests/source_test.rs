//! Record sources feeding the engine.

use std::io::Write;
use tempfile::NamedTempFile;

use assay::{
    CsvConfig, CsvSource, EngineConfig, JsonLinesSource, RecordSource, RuleRegistry, RuleSetDocument, Severity,
    ValidationEngine,
};

/// Helper to create a temporary file with given content.
fn create_test_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write to temp file");
    file
}

fn registry() -> RuleRegistry {
    let doc = RuleSetDocument::from_json(
        r#"{
            "version": "ed-triage-4",
            "fields": [
                {"name": "age", "type": "integer", "required": true},
                {"name": "arrival", "type": "datetime", "required": true},
                {"name": "triage", "type": "datetime", "required": true},
                {"name": "mrn", "type": "string", "required": true}
            ],
            "rules": [
                {"id": "ed.age_range", "domain": "demographics", "field": "age", "kind": "range",
                 "parameters": {"min": 0, "max": 120}, "severity": "CRITICAL"},
                {"id": "ed.mrn_format", "domain": "identity", "field": "mrn", "kind": "pattern",
                 "parameters": {"regex": "^MRN[0-9]{6}$"}, "severity": "ERROR"},
                {"id": "ed.triage_after_arrival", "domain": "encounter", "fields": ["arrival", "triage"],
                 "kind": "cross_field",
                 "parameters": {"relation": {"compare": {
                     "left": {"field": "triage"}, "op": "ge", "right": {"field": "arrival"}}}},
                 "severity": "ERROR"}
            ]
        }"#,
    )
    .unwrap();
    RuleRegistry::load(doc).unwrap()
}

fn engine() -> ValidationEngine {
    ValidationEngine::new(EngineConfig::default().with_workers(2)).unwrap()
}

#[test]
fn test_csv_batch_end_to_end() {
    let content = "encounter,age,arrival,triage,mrn\n\
                   e1,44,2026-01-03T08:00:00,2026-01-03T08:07:00,MRN000123\n\
                   e2,abc,2026-01-03T09:00:00,2026-01-03T09:02:00,MRN000124\n\
                   e3,61,2026-01-03T10:00:00,2026-01-03T09:40:00,mrn-7\n\
                   e4,29,2026-01-03T11:00:00\n";
    let file = create_test_file(content);
    let registry = registry();

    let mut source = CsvSource::new(file.path())
        .with_config(CsvConfig {
            id_column: "encounter".to_string(),
            ..CsvConfig::default()
        })
        .with_fields(registry.fields());
    let batch = source.records().expect("read failed");
    assert_eq!(batch.len(), 4);

    let result = engine().validate(&batch, &registry, None).unwrap();
    assert!(result.batch_id.starts_with("sha256:"));
    assert_eq!(result.ruleset_version, "ed-triage-4");

    let summary: Vec<(&str, &str, Severity)> = result
        .findings
        .iter()
        .map(|f| (f.record_id.as_str(), f.rule_id.as_str(), f.severity))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("e2", "schema.age", Severity::Error),
            ("e3", "ed.mrn_format", Severity::Error),
            ("e3", "ed.triage_after_arrival", Severity::Error),
            ("e4", "system.unparseable_record", Severity::Critical),
        ]
    );
    assert_eq!(result.findings[0].message, "type mismatch");
}

#[test]
fn test_semicolon_file_is_detected() {
    let content = "id;age;arrival;triage;mrn\n\
                   a;200;2026-01-03 08:00:00;2026-01-03 08:01:00;MRN000001\n\
                   b;30;2026-01-03 08:00:00;2026-01-03 08:01:00;MRN000002\n";
    let file = create_test_file(content);
    let registry = registry();

    let batch = CsvSource::new(file.path())
        .with_fields(registry.fields())
        .records()
        .unwrap();
    let result = engine().validate(&batch, &registry, None).unwrap();
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].record_id, "a");
    assert_eq!(result.findings[0].severity, Severity::Critical);
}

#[test]
fn test_json_lines_batch() {
    let content = r#"{"id": "e1", "age": 44, "arrival": "2026-01-03T08:00:00Z", "triage": "2026-01-03T08:05:00Z", "mrn": "MRN000123"}
{"id": "e2", "age": 50, "arrival": "2026-01-03T08:00:00Z", "mrn": "MRN000124"}
{"id": "e3", "age": {"years": 3}}
"#;
    let file = create_test_file(content);
    let registry = registry();

    let batch = JsonLinesSource::new(file.path())
        .with_fields(registry.fields())
        .records()
        .unwrap();
    let result = engine().validate(&batch, &registry, None).unwrap();

    let e2: Vec<_> = result.findings.iter().filter(|f| f.record_id == "e2").collect();
    assert_eq!(e2.len(), 1);
    assert_eq!(e2[0].rule_id, "schema.triage");
    assert_eq!(e2[0].message, "missing required field");

    let e3: Vec<_> = result.findings.iter().filter(|f| f.record_id == "e3").collect();
    assert_eq!(e3.len(), 1);
    assert_eq!(e3[0].severity, Severity::Critical);
}

#[test]
fn test_missing_file_is_io_error() {
    let mut source = CsvSource::new("/nonexistent/admissions.csv");
    assert!(matches!(source.records(), Err(assay::AssayError::Io { .. })));
}
