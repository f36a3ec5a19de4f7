//! Tamper-evident audit trail of runs, findings and remediations.

mod entry;
mod sink;
mod trail;

pub use entry::{AuditEntry, AuditEvent, GENESIS_HASH};
pub use sink::{AuditSink, EntryIter, JsonlSink, MemorySink};
pub use trail::{AuditFilter, AuditTrail, VerifyReport};
