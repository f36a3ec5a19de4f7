//! Records and record batches.

use indexmap::IndexMap;

use crate::error::{AssayError, Result};

use super::value::Value;

/// One ingested row: field name to typed scalar, plus stable identifiers.
///
/// Records are immutable once built; there are no setters.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: String,
    batch_id: String,
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Start a record with the given identifiers and no fields.
    pub fn new(id: impl Into<String>, batch_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            batch_id: batch_id.into(),
            fields: IndexMap::new(),
        }
    }

    /// Add a field while building the record.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Build a record from a JSON object of scalars.
    pub fn from_json(
        id: impl Into<String>,
        batch_id: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Result<Self> {
        let id = id.into();
        let object = payload.as_object().ok_or_else(|| AssayError::Record {
            record_id: id.clone(),
            reason: "payload is not a JSON object".to_string(),
        })?;

        let mut fields = IndexMap::with_capacity(object.len());
        for (name, raw) in object {
            let value = Value::from_json(raw).ok_or_else(|| AssayError::Record {
                record_id: id.clone(),
                reason: format!("field '{}' is not a scalar", name),
            })?;
            fields.insert(name.clone(), value);
        }

        Ok(Self {
            id,
            batch_id: batch_id.into(),
            fields,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Get a present, non-null field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Check whether a field is present and non-null.
    pub fn has(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Iterate over all fields in ingestion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A batch entry: either a parsed record or the reason it could not be parsed.
#[derive(Debug, Clone)]
pub enum Ingested {
    Parsed(Record),
    Unparseable { record_id: String, reason: String },
}

impl Ingested {
    pub fn record_id(&self) -> &str {
        match self {
            Ingested::Parsed(r) => r.id(),
            Ingested::Unparseable { record_id, .. } => record_id,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Ingested::Parsed(r) => Some(r),
            Ingested::Unparseable { .. } => None,
        }
    }
}

impl From<Result<Record>> for Ingested {
    fn from(result: Result<Record>) -> Self {
        match result {
            Ok(record) => Ingested::Parsed(record),
            Err(AssayError::Record { record_id, reason }) => {
                Ingested::Unparseable { record_id, reason }
            }
            Err(other) => Ingested::Unparseable {
                record_id: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// An ordered set of ingested records sharing a source batch.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    id: String,
    entries: Vec<Ingested>,
}

impl RecordBatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: Vec::new(),
        }
    }

    /// Build a batch from already-parsed records.
    pub fn from_records(id: impl Into<String>, records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            id: id.into(),
            entries: records.into_iter().map(Ingested::Parsed).collect(),
        }
    }

    pub fn push(&mut self, record: Record) {
        self.entries.push(Ingested::Parsed(record));
    }

    /// Add a JSON payload; payloads that cannot be parsed are kept as
    /// unparseable entries rather than rejected.
    pub fn push_json(&mut self, record_id: impl Into<String>, payload: &serde_json::Value) {
        let batch_id = self.id.clone();
        self.entries
            .push(Record::from_json(record_id, batch_id, payload).into());
    }

    pub fn push_unparseable(&mut self, record_id: impl Into<String>, reason: impl Into<String>) {
        self.entries.push(Ingested::Unparseable {
            record_id: record_id.into(),
            reason: reason.into(),
        });
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entries(&self) -> &[Ingested] {
        &self.entries
    }

    /// Iterate over the parsed records only.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().filter_map(Ingested::as_record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_json() {
        let record = Record::from_json("p1", "b1", &json!({"age": 40, "gender": "F", "note": null}))
            .unwrap();
        assert_eq!(record.get("age"), Some(&Value::Int(40)));
        assert!(record.has("gender"));
        // Explicit nulls read as missing.
        assert!(!record.has("note"));
    }

    #[test]
    fn test_record_from_json_rejects_nested() {
        let err = Record::from_json("p2", "b1", &json!({"labs": [1, 2]})).unwrap_err();
        assert!(matches!(err, AssayError::Record { .. }));
    }

    #[test]
    fn test_batch_keeps_unparseable_entries() {
        let mut batch = RecordBatch::new("b1");
        batch.push_json("p1", &json!({"age": 30}));
        batch.push_json("p2", &json!("not an object"));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records().count(), 1);
        assert!(matches!(batch.entries()[1], Ingested::Unparseable { .. }));
        assert_eq!(batch.entries()[1].record_id(), "p2");
    }
}
