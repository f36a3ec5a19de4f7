//! Audit ledger entries and the hash chain linking them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::result::RunStatus;
use crate::validation::{Finding, RemediationStatus, Severity};

/// `prev_hash` of the first entry in a ledger.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What an audit entry records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    RunStarted {
        batch_id: String,
        record_count: usize,
        ruleset_digest: String,
    },
    /// Snapshot of a finding as it was produced.
    Finding(Finding),
    /// A status change linked to a finding recorded in an earlier run.
    Remediation {
        finding_id: String,
        finding_run: u64,
        rule_id: String,
        from: RemediationStatus,
        to: RemediationStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    RunCompleted {
        status: RunStatus,
        score: f64,
        finding_count: usize,
        total_checks: usize,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::RunStarted { .. } => "run_started",
            AuditEvent::Finding(_) => "finding",
            AuditEvent::Remediation { .. } => "remediation",
            AuditEvent::RunCompleted { .. } => "run_completed",
        }
    }

    pub fn finding(&self) -> Option<&Finding> {
        match self {
            AuditEvent::Finding(f) => Some(f),
            _ => None,
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        self.finding().map(|f| f.severity)
    }

    /// Rule the event concerns, for finding and remediation events.
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            AuditEvent::Finding(f) => Some(&f.rule_id),
            AuditEvent::Remediation { rule_id, .. } => Some(rule_id),
            _ => None,
        }
    }

    /// Finding the event concerns, for finding and remediation events.
    pub fn finding_id(&self) -> Option<&str> {
        match self {
            AuditEvent::Finding(f) => Some(&f.id),
            AuditEvent::Remediation { finding_id, .. } => Some(finding_id),
            _ => None,
        }
    }
}

/// One immutable record in the compliance ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Strictly increasing position in the ledger, starting at 1.
    pub entry_id: u64,
    /// Run the entry belongs to; non-decreasing in ledger order.
    pub run_id: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub ruleset_version: String,
    pub event: AuditEvent,
    /// Hash of the previous entry.
    pub prev_hash: String,
    /// SHA-256 over every other field of this entry.
    pub hash: String,
}

#[derive(Serialize)]
struct HashInput<'a> {
    entry_id: u64,
    run_id: u64,
    timestamp: &'a DateTime<Utc>,
    actor: &'a str,
    ruleset_version: &'a str,
    event: &'a AuditEvent,
    prev_hash: &'a str,
}

impl AuditEntry {
    /// Build an entry and seal it onto the chain after `prev_hash`.
    pub(crate) fn seal(
        entry_id: u64,
        run_id: u64,
        actor: &str,
        ruleset_version: &str,
        event: AuditEvent,
        prev_hash: &str,
    ) -> Result<Self> {
        let mut entry = Self {
            entry_id,
            run_id,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            ruleset_version: ruleset_version.to_string(),
            event,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Recompute the hash from the entry's content.
    pub fn compute_hash(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&HashInput {
            entry_id: self.entry_id,
            run_id: self.run_id,
            timestamp: &self.timestamp,
            actor: &self.actor,
            ruleset_version: &self.ruleset_version,
            event: &self.event,
            prev_hash: &self.prev_hash,
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Whether the stored hash matches the content.
    pub fn is_intact(&self) -> bool {
        self.compute_hash().is_ok_and(|h| h == self.hash)
    }
}
