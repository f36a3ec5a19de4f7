//! Durable storage behind the audit trail.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{AssayError, Result};

use super::entry::AuditEntry;

/// Lazy sequence of stored entries in ledger order.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<AuditEntry>> + 'a>;

/// Append/scan contract for audit storage.
///
/// `append` must be durable when it returns `Ok`. Sinks never update or
/// delete entries.
pub trait AuditSink: Send + Sync {
    /// Durably store one entry after all previously stored entries.
    fn append(&self, entry: &AuditEntry) -> io::Result<()>;

    /// Iterate stored entries in the order they were appended.
    fn scan(&self) -> Result<EntryIter<'_>>;
}

/// In-memory sink for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemorySink {
    fn append(&self, entry: &AuditEntry) -> io::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    fn scan(&self) -> Result<EntryIter<'_>> {
        Ok(Box::new(self.entries().into_iter().map(Ok)))
    }
}

/// JSON-lines file sink: one entry per line, flushed and synced per append.
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open or create a ledger file for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AssayError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlSink {
    fn append(&self, entry: &AuditEntry) -> io::Result<()> {
        let line = serde_json::to_string(entry).map_err(io::Error::other)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn scan(&self) -> Result<EntryIter<'_>> {
        let file = File::open(&self.path).map_err(|e| AssayError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let path = self.path.clone();

        let entries = BufReader::new(file)
            .lines()
            .enumerate()
            .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .map(move |(n, line)| {
                let line = line.map_err(|e| AssayError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                serde_json::from_str(&line).map_err(|e| AssayError::AuditIntegrity {
                    entry_id: 0,
                    message: format!("line {} of '{}' is not a ledger entry: {}", n + 1, path.display(), e),
                })
            });
        Ok(Box::new(entries))
    }
}
