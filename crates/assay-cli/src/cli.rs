//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Assay: quality control for clinical tabular records
#[derive(Parser)]
#[command(name = "assay")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a batch of records against a rule set
    Validate {
        /// Path to the record file (CSV/TSV or JSON lines)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Path to the rule-set document
        #[arg(short, long)]
        rules: PathBuf,

        /// Input format (default: inferred from the file extension)
        #[arg(long)]
        format: Option<InputFormat>,

        /// Column or key holding the record identifier
        #[arg(long, default_value = "id")]
        id_column: String,

        /// Precomputed baselines (default: computed from this batch)
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Reference data for cross-field rules
        #[arg(long)]
        references: Option<PathBuf>,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Audit ledger to commit the run to
        #[arg(short, long)]
        audit: Option<PathBuf>,

        /// Actor recorded on audit entries
        #[arg(long)]
        actor: Option<String>,

        /// Worker threads (overrides the configuration)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Exit non-zero when a finding at or above this severity exists
        #[arg(long)]
        fail_on: Option<String>,

        /// Output the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute statistical baselines from a reference batch
    Baseline {
        /// Path to the record file (CSV/TSV or JSON lines)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Path to the rule-set document
        #[arg(short, long)]
        rules: PathBuf,

        /// Output path for the baseline file
        #[arg(short, long)]
        output: PathBuf,

        /// Input format (default: inferred from the file extension)
        #[arg(long)]
        format: Option<InputFormat>,

        /// Column or key holding the record identifier
        #[arg(long, default_value = "id")]
        id_column: String,

        /// Reference data for cohort derivation
        #[arg(long)]
        references: Option<PathBuf>,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Query or verify an audit ledger
    Audit {
        /// Path to the audit ledger
        #[arg(value_name = "LEDGER")]
        ledger: PathBuf,

        /// Verify the hash chain instead of listing entries
        #[arg(long)]
        verify: bool,

        /// Only entries of this run
        #[arg(long, conflicts_with_all = ["from_run", "to_run"])]
        run: Option<u64>,

        /// First run of a run range
        #[arg(long)]
        from_run: Option<u64>,

        /// Last run of a run range
        #[arg(long)]
        to_run: Option<u64>,

        /// Only findings at or above this severity
        #[arg(long)]
        severity: Option<String>,

        /// Only entries about this rule
        #[arg(long)]
        rule: Option<String>,

        /// Only entries about this finding
        #[arg(long)]
        finding: Option<String>,

        /// Only entries at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,

        /// Only entries at or before this RFC 3339 timestamp
        #[arg(long)]
        until: Option<String>,

        /// Output entries as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Record a remediation status change for a finding
    Remediate {
        /// Path to the audit ledger
        #[arg(value_name = "LEDGER")]
        ledger: PathBuf,

        /// Run that produced the finding
        #[arg(long)]
        run: u64,

        /// Finding identifier
        #[arg(long)]
        finding: String,

        /// New status (acknowledged, resolved)
        #[arg(long)]
        status: String,

        /// User name for the change
        #[arg(long, default_value = "cli")]
        actor: String,

        /// Free-text note stored with the change
        #[arg(long)]
        note: Option<String>,
    },

    /// Check a rule-set document and list its rules
    Rules {
        /// Path to the rule-set document
        #[arg(value_name = "RULES")]
        file: PathBuf,

        /// Only rules of this domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Record file formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Delimited text (comma, tab, semicolon or pipe)
    Csv,
    /// One JSON object per line
    Jsonl,
}

impl InputFormat {
    /// Infer the format from a file extension, defaulting to delimited text.
    pub fn infer(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") | Some("json") => InputFormat::Jsonl,
            _ => InputFormat::Csv,
        }
    }
}
