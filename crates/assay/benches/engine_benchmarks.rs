//! Validation engine performance benchmarks.
//!
//! Measures batch validation across worker counts, baseline computation and
//! single-record streaming validation.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use assay::{
    EngineConfig, Record, RecordBatch, ReferenceData, RuleRegistry, RuleSetDocument, StreamValidator,
    ValidationEngine,
};

const RULES: &str = r#"{
    "version": "bench-1",
    "fields": [
        {"name": "age", "type": "integer", "required": true},
        {"name": "gender", "type": "string", "required": true},
        {"name": "ward", "type": "string", "required": true},
        {"name": "sbp", "type": "float", "required": true},
        {"name": "dbp", "type": "float", "required": true},
        {"name": "mrn", "type": "string", "required": true}
    ],
    "cohorts": {"ward": {"field": "ward"}},
    "rules": [
        {"id": "age_range", "domain": "demographics", "field": "age", "kind": "range",
         "parameters": {"min": 0, "max": 120}, "severity": "CRITICAL"},
        {"id": "gender_code", "domain": "demographics", "field": "gender", "kind": "set",
         "parameters": {"values": ["F", "M", "X"]}, "severity": "ERROR"},
        {"id": "mrn_format", "domain": "identity", "field": "mrn", "kind": "pattern",
         "parameters": {"regex": "^MRN[0-9]{6}$"}, "severity": "ERROR"},
        {"id": "sbp_outlier", "domain": "vitals", "field": "sbp", "kind": "statistical",
         "parameters": {"method": "iqr", "cohort": "ward"}, "severity": "WARNING"},
        {"id": "pulse_pressure", "domain": "vitals", "fields": ["sbp", "dbp"], "kind": "cross_field",
         "parameters": {"relation": {"compare": {"left": {"field": "sbp"}, "op": "gt", "right": {"field": "dbp"}}}},
         "severity": "ERROR"}
    ]
}"#;

/// Generate a synthetic admissions batch with a sprinkling of defects.
fn generate_batch(rows: usize) -> RecordBatch {
    let wards = ["ICU", "CARDIO", "ED", "ONC"];
    let genders = ["F", "M", "X", "U"];
    RecordBatch::from_records(
        "bench",
        (0..rows).map(|row| {
            let age = if row % 97 == 0 { 150 } else { 18 + (row % 70) as i64 };
            let sbp = if row % 53 == 0 { 260.0 } else { 105.0 + (row % 40) as f64 };
            Record::new(format!("P{:06}", row), "bench")
                .with("age", age)
                .with("gender", genders[row % genders.len()])
                .with("ward", wards[row % wards.len()])
                .with("sbp", sbp)
                .with("dbp", 60.0 + (row % 25) as f64)
                .with("mrn", format!("MRN{:06}", row))
        }),
    )
}

fn registry() -> RuleRegistry {
    RuleRegistry::load(RuleSetDocument::from_json(RULES).unwrap()).unwrap()
}

/// Benchmark batch validation with baselines computed in-run.
fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    let registry = registry();

    for rows in [100, 1_000, 10_000].iter() {
        let batch = generate_batch(*rows);
        group.throughput(Throughput::Elements(*rows as u64));

        for workers in [1, 4].iter() {
            let engine = ValidationEngine::new(EngineConfig::default().with_workers(*workers)).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("workers_{}", workers), rows),
                &batch,
                |b, batch| b.iter(|| black_box(engine.validate(batch, &registry, None).unwrap())),
            );
        }
    }

    group.finish();
}

/// Benchmark baseline computation alone.
fn bench_baselines(c: &mut Criterion) {
    let mut group = c.benchmark_group("baselines");
    let registry = registry();
    let engine = ValidationEngine::new(EngineConfig::default()).unwrap();
    let references = ReferenceData::new();

    for rows in [1_000, 10_000].iter() {
        let batch = generate_batch(*rows);
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::new("rows", rows), &batch, |b, batch| {
            b.iter(|| black_box(engine.compute_baselines(batch, &registry, &references)))
        });
    }

    group.finish();
}

/// Benchmark the streaming entry point against precomputed baselines.
fn bench_validate_one(c: &mut Criterion) {
    let registry = Arc::new(registry());
    let config = EngineConfig::default();
    let engine = ValidationEngine::new(config.clone()).unwrap();
    let baselines = Arc::new(engine.compute_baselines(&generate_batch(2_000), &registry, &ReferenceData::new()));
    let stream = StreamValidator::new(registry, baselines, &config);
    let record = Record::new("P999999", "live")
        .with("age", 61i64)
        .with("gender", "F")
        .with("ward", "ICU")
        .with("sbp", 210.0)
        .with("dbp", 95.0)
        .with("mrn", "MRN999999");

    c.bench_function("validate_one", |b| b.iter(|| black_box(stream.validate_one(&record))));
}

criterion_group!(benches, bench_validate, bench_baselines, bench_validate_one);
criterion_main!(benches);
