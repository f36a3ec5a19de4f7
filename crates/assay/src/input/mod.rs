//! Record sources: delimited files and JSON lines.

mod delimited;
mod jsonl;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::record::{FieldType, RecordBatch};
use crate::rules::FieldSpec;

pub use delimited::{CsvConfig, CsvSource};
pub use jsonl::JsonLinesSource;

/// Anything that can produce a batch of records for validation.
pub trait RecordSource {
    /// Read the whole source into a batch. Rows that cannot be turned into
    /// records become unparseable entries instead of errors.
    fn records(&mut self) -> Result<RecordBatch>;
}

/// Declared field types keyed by name, used to coerce raw values.
pub(crate) fn field_types(fields: &IndexMap<String, FieldSpec>) -> IndexMap<String, FieldType> {
    fields
        .iter()
        .map(|(name, spec)| (name.clone(), spec.field_type))
        .collect()
}

/// Content digest used as the batch id.
pub(crate) fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}
