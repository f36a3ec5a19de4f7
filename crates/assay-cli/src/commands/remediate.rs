//! Remediate command - record a finding status change in the ledger.

use std::path::PathBuf;

use colored::Colorize;

use assay::{AuditTrail, JsonlSink, RemediationStatus};

pub fn run(
    ledger: PathBuf,
    run: u64,
    finding: String,
    status: String,
    actor: String,
    note: Option<String>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !ledger.exists() {
        return Err(format!("Audit ledger not found: {}", ledger.display()).into());
    }
    let to: RemediationStatus = status.parse()?;
    let trail = AuditTrail::open(JsonlSink::open(&ledger)?)?;

    if verbose {
        if let Some(current) = trail.status_of(run, &finding)? {
            println!("  Current status: {}", current.to_string().white());
        }
    }

    let entry_id = trail.remediate(run, &finding, to, &actor, note.as_deref())?;

    println!(
        "{} {} -> {} (entry {})",
        "Recorded".green().bold(),
        finding.cyan(),
        to.to_string().white().bold(),
        entry_id
    );

    Ok(())
}
