//! Read-only external reference data (death dates, visit windows, ...).

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{AssayError, Result};

use super::value::Value;

/// External reference values keyed by record id, then by reference name.
///
/// Reference data is never stored on a record; it is handed to rule
/// evaluation through the evaluation context and is never mutated there.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    values: HashMap<String, HashMap<String, Value>>,
}

impl ReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference value while building the set.
    pub fn with(
        mut self,
        record_id: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.values
            .entry(record_id.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Look up a non-null reference value for a record.
    pub fn get(&self, record_id: &str, name: &str) -> Option<&Value> {
        self.values
            .get(record_id)
            .and_then(|m| m.get(name))
            .filter(|v| !v.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Load reference data from a JSON document of the form
    /// `{"<record id>": {"<name>": <scalar>, ...}, ...}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| AssayError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let raw: HashMap<String, HashMap<String, serde_json::Value>> =
            serde_json::from_reader(BufReader::new(file))?;

        let mut values = HashMap::with_capacity(raw.len());
        for (record_id, entries) in raw {
            let mut converted = HashMap::with_capacity(entries.len());
            for (name, value) in entries {
                let value = Value::from_json(&value).ok_or_else(|| {
                    AssayError::Persistence(format!(
                        "reference '{}' for record '{}' is not a scalar",
                        name, record_id
                    ))
                })?;
                converted.insert(name, value);
            }
            values.insert(record_id, converted);
        }

        Ok(Self { values })
    }
}
