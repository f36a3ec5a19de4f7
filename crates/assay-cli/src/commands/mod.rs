//! CLI command implementations.

pub mod audit;
pub mod baseline;
pub mod remediate;
pub mod rules;
pub mod validate;

use std::path::{Path, PathBuf};

use assay::{CsvConfig, CsvSource, EngineConfig, JsonLinesSource, RecordBatch, RecordSource, RuleRegistry};

use crate::cli::InputFormat;

/// Read a record file in the given (or inferred) format, coercing values
/// by the registry's declared field types.
pub(crate) fn read_batch(
    file: &Path,
    format: Option<InputFormat>,
    id_column: &str,
    registry: &RuleRegistry,
) -> Result<RecordBatch, Box<dyn std::error::Error>> {
    if !file.exists() {
        return Err(format!("File not found: {}", file.display()).into());
    }

    let batch = match format.unwrap_or_else(|| InputFormat::infer(file)) {
        InputFormat::Csv => CsvSource::new(file)
            .with_config(CsvConfig {
                id_column: id_column.to_string(),
                ..CsvConfig::default()
            })
            .with_fields(registry.fields())
            .records()?,
        InputFormat::Jsonl => JsonLinesSource::new(file)
            .with_id_field(id_column)
            .with_fields(registry.fields())
            .records()?,
    };
    Ok(batch)
}

/// Load the engine configuration, falling back to defaults.
pub(crate) fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(p) => EngineConfig::load(p)?,
        None => EngineConfig::default(),
    })
}
