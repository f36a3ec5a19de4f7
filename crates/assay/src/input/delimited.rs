//! CSV/TSV record source with delimiter detection.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{AssayError, Result};
use crate::record::{FieldType, Record, RecordBatch, Value};
use crate::rules::FieldSpec;

use super::{RecordSource, content_digest, field_types};

/// Delimiters to try when auto-detecting.
const DELIMITERS: &[u8] = &[b'\t', b',', b';', b'|'];

/// Delimited file options.
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Delimiter to use (None = auto-detect).
    pub delimiter: Option<u8>,
    /// Column holding the record id.
    pub id_column: String,
    /// Maximum rows to read (None = all).
    pub max_rows: Option<usize>,
    /// Quote character.
    pub quote: u8,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            id_column: "id".to_string(),
            max_rows: None,
            quote: b'"',
        }
    }
}

/// Reads records from a delimited file with a header row.
///
/// Cells of declared fields are coerced to their declared type; other
/// columns are kept as text. Null tokens such as `NA` or `.` become nulls.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    config: CsvConfig,
    types: IndexMap<String, FieldType>,
}

impl CsvSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: CsvConfig::default(),
            types: IndexMap::new(),
        }
    }

    pub fn with_config(mut self, config: CsvConfig) -> Self {
        self.config = config;
        self
    }

    /// Coerce cells using the given field declarations.
    pub fn with_fields(mut self, fields: &IndexMap<String, FieldSpec>) -> Self {
        self.types = field_types(fields);
        self
    }

    /// Parse bytes into a batch with the given id.
    pub(crate) fn parse_bytes(&self, bytes: &[u8], delimiter: u8, batch_id: &str) -> Result<RecordBatch> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .quote(self.config.quote)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.trim().to_string()).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(AssayError::EmptyData("No columns found".to_string()));
        }
        let id_index = headers
            .iter()
            .position(|h| *h == self.config.id_column)
            .ok_or_else(|| {
                AssayError::config(format!(
                    "id column '{}' not found in header",
                    self.config.id_column
                ))
            })?;

        let mut batch = RecordBatch::new(batch_id);
        for (row_idx, result) in reader.records().enumerate() {
            if self.config.max_rows.is_some_and(|max| row_idx >= max) {
                break;
            }
            // Data rows start on line 2.
            let fallback_id = format!("row-{}", row_idx + 2);

            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    batch.push_unparseable(fallback_id, e.to_string());
                    continue;
                }
            };

            let record_id = row
                .get(id_index)
                .map(str::trim)
                .filter(|id| !Value::is_null_token(id))
                .map(String::from);

            if row.len() != headers.len() {
                batch.push_unparseable(
                    record_id.unwrap_or(fallback_id),
                    format!("expected {} columns, found {}", headers.len(), row.len()),
                );
                continue;
            }
            let Some(record_id) = record_id else {
                batch.push_unparseable(fallback_id, format!("missing value in id column '{}'", self.config.id_column));
                continue;
            };

            let mut record = Record::new(record_id, batch_id);
            for (i, (name, cell)) in headers.iter().zip(row.iter()).enumerate() {
                if i == id_index {
                    continue;
                }
                let field_type = self.types.get(name).copied().unwrap_or(FieldType::String);
                record = record.with(name.as_str(), Value::coerce(cell, field_type));
            }
            batch.push(record);
        }

        if batch.is_empty() {
            return Err(AssayError::EmptyData("No data rows found".to_string()));
        }
        Ok(batch)
    }
}

impl RecordSource for CsvSource {
    fn records(&mut self) -> Result<RecordBatch> {
        let io_err = |e: std::io::Error| AssayError::Io {
            path: self.path.clone(),
            source: e,
        };
        let mut contents = Vec::new();
        File::open(&self.path)
            .and_then(|mut f| f.read_to_end(&mut contents))
            .map_err(io_err)?;

        let delimiter = match self.config.delimiter {
            Some(d) => d,
            None => detect_delimiter(&contents)?,
        };
        let batch = self.parse_bytes(&contents, delimiter, &content_digest(&contents))?;

        tracing::debug!(
            path = %self.path.display(),
            delimiter = %(delimiter as char).escape_default(),
            entries = batch.len(),
            "read delimited source"
        );
        Ok(batch)
    }
}

/// Detect the delimiter by analyzing the first few lines.
fn detect_delimiter(bytes: &[u8]) -> Result<u8> {
    let reader = BufReader::new(bytes);
    let lines: Vec<String> = reader
        .lines()
        .take(10)
        .filter_map(|l| l.ok())
        .filter(|l| !l.trim().is_empty())
        .collect();

    if lines.is_empty() {
        return Err(AssayError::EmptyData("No lines to analyze".to_string()));
    }

    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in DELIMITERS {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| count_delimiter_in_line(line, delim))
            .collect();

        let first_count = counts[0];
        if first_count == 0 {
            continue;
        }

        let consistent = counts.iter().all(|&c| c == first_count);
        let variance: f64 = if counts.len() > 1 {
            let mean = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
            counts.iter().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / counts.len() as f64
        } else {
            0.0
        };

        // Tab wins ties.
        let score = if consistent {
            first_count * 1000 + (if delim == b'\t' { 100 } else { 0 })
        } else if variance < 1.0 {
            first_count * 100
        } else {
            first_count
        };

        if score > best_score {
            best_score = score;
            best_delimiter = delim;
        }
    }

    Ok(best_delimiter)
}

/// Count delimiter occurrences in a line, respecting quotes.
fn count_delimiter_in_line(line: &str, delimiter: u8) -> usize {
    let delim_char = delimiter as char;
    let mut count = 0;
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == delim_char && !in_quotes => count += 1,
            _ => {}
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> IndexMap<String, FieldSpec> {
        [
            ("age", FieldType::Integer),
            ("admission_date", FieldType::Date),
        ]
        .into_iter()
        .map(|(name, field_type)| {
            (
                name.to_string(),
                FieldSpec {
                    name: name.to_string(),
                    field_type,
                    required: true,
                },
            )
        })
        .collect()
    }

    #[test]
    fn test_detect_delimiter_csv() {
        let data = b"id,age,city\n1,2,3\n4,5,6";
        assert_eq!(detect_delimiter(data).unwrap(), b',');
    }

    #[test]
    fn test_detect_delimiter_tsv() {
        let data = b"id\tage\tcity\n1\t2\t3\n4\t5\t6";
        assert_eq!(detect_delimiter(data).unwrap(), b'\t');
    }

    #[test]
    fn test_count_ignores_quoted_delimiters() {
        assert_eq!(count_delimiter_in_line(r#"a,"b,c",d"#, b','), 2);
    }

    #[test]
    fn test_parse_coerces_declared_fields() {
        let source = CsvSource::new("unused.csv").with_fields(&fields());
        let data = b"id,age,admission_date,ward\np1,42,2024-03-01,ICU\np2,NA,2024-03-02,.";
        let batch = source.parse_bytes(data, b',', "b1").unwrap();

        assert_eq!(batch.len(), 2);
        let first = batch.entries()[0].as_record().unwrap();
        assert_eq!(first.id(), "p1");
        assert_eq!(first.get("age"), Some(&Value::Int(42)));
        assert!(matches!(first.get("admission_date"), Some(Value::Date(_))));
        assert_eq!(first.get("ward"), Some(&Value::Text("ICU".to_string())));
        assert!(!first.has("id"));

        let second = batch.entries()[1].as_record().unwrap();
        assert!(!second.has("age"));
        assert!(!second.has("ward"));
    }

    #[test]
    fn test_ragged_row_becomes_unparseable() {
        let source = CsvSource::new("unused.csv");
        let data = b"id,age\np1,42\np2,43,extra\n,44";
        let batch = source.parse_bytes(data, b',', "b1").unwrap();

        assert_eq!(batch.len(), 3);
        assert!(batch.entries()[0].as_record().is_some());
        assert_eq!(batch.entries()[1].record_id(), "p2");
        assert!(batch.entries()[1].as_record().is_none());
        assert_eq!(batch.entries()[2].record_id(), "row-4");
        assert!(batch.entries()[2].as_record().is_none());
    }

    #[test]
    fn test_missing_id_column_is_config_error() {
        let source = CsvSource::new("unused.csv").with_config(CsvConfig {
            id_column: "patient_id".to_string(),
            ..CsvConfig::default()
        });
        let err = source.parse_bytes(b"id,age\np1,42", b',', "b1").unwrap_err();
        assert!(matches!(err, AssayError::Config(_)));
    }

    #[test]
    fn test_records_from_file_uses_digest_batch_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vitals.tsv");
        std::fs::write(&path, "id\tage\np1\t42\np2\t51\n").unwrap();

        let mut source = CsvSource::new(&path).with_fields(&fields());
        let batch = source.records().unwrap();
        assert!(batch.id().starts_with("sha256:"));
        assert_eq!(batch.records().count(), 2);
        assert_eq!(batch.records().next().unwrap().batch_id(), batch.id());
    }
}
