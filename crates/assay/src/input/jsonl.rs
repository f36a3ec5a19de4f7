//! JSON-lines record source.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{AssayError, Result};
use crate::record::{FieldType, Record, RecordBatch, Value};
use crate::rules::FieldSpec;

use super::{RecordSource, content_digest, field_types};

/// Reads one JSON object per line. Blank lines are skipped.
///
/// The id is taken from `id_field` (string or integer). Text values of
/// declared fields are coerced to their declared type.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    id_field: String,
    types: IndexMap<String, FieldType>,
}

impl JsonLinesSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            id_field: "id".to_string(),
            types: IndexMap::new(),
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_fields(mut self, fields: &IndexMap<String, FieldSpec>) -> Self {
        self.types = field_types(fields);
        self
    }

    pub(crate) fn parse_str(&self, text: &str, batch_id: &str) -> RecordBatch {
        let mut batch = RecordBatch::new(batch_id);
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fallback_id = format!("line-{}", n + 1);
            match self.parse_line(line, batch_id) {
                Ok(record) => batch.push(record),
                Err((id, reason)) => batch.push_unparseable(id.unwrap_or(fallback_id), reason),
            }
        }
        batch
    }

    fn parse_line(&self, line: &str, batch_id: &str) -> std::result::Result<Record, (Option<String>, String)> {
        let payload: JsonValue = serde_json::from_str(line).map_err(|e| (None, format!("invalid JSON: {}", e)))?;
        let object = payload
            .as_object()
            .ok_or_else(|| (None, "line is not a JSON object".to_string()))?;

        let id = match object.get(&self.id_field) {
            Some(JsonValue::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(JsonValue::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            _ => return Err((None, format!("missing record id '{}'", self.id_field))),
        };

        let mut record = Record::new(id.as_str(), batch_id);
        for (name, raw) in object {
            if *name == self.id_field {
                continue;
            }
            let value = Value::from_json(raw)
                .ok_or_else(|| (Some(id.clone()), format!("field '{}' is not a scalar", name)))?;
            let value = match (value, self.types.get(name)) {
                (Value::Text(s), Some(&field_type)) => Value::coerce(&s, field_type),
                (value, _) => value,
            };
            record = record.with(name.as_str(), value);
        }
        Ok(record)
    }
}

impl RecordSource for JsonLinesSource {
    fn records(&mut self) -> Result<RecordBatch> {
        let text = fs::read_to_string(&self.path).map_err(|e| AssayError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let batch = self.parse_str(&text, &content_digest(text.as_bytes()));
        if batch.is_empty() {
            return Err(AssayError::EmptyData("No records found".to_string()));
        }
        tracing::debug!(path = %self.path.display(), entries = batch.len(), "read json-lines source");
        Ok(batch)
    }
}
