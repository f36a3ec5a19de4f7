//! Record model: typed values, records, batches and reference data.

#[allow(clippy::module_inception)]
mod record;
mod reference;
mod value;

pub use record::{Ingested, Record, RecordBatch};
pub use reference::ReferenceData;
pub use value::{FieldType, Value};
