//! Audit command - query or verify an audit ledger.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use colored::Colorize;

use assay::{AuditEntry, AuditEvent, AuditFilter, AuditTrail, JsonlSink, Severity};

#[allow(clippy::too_many_arguments)]
pub fn run(
    ledger: PathBuf,
    verify: bool,
    run: Option<u64>,
    from_run: Option<u64>,
    to_run: Option<u64>,
    severity: Option<String>,
    rule: Option<String>,
    finding: Option<String>,
    since: Option<String>,
    until: Option<String>,
    json_output: bool,
    _verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !ledger.exists() {
        return Err(format!("Audit ledger not found: {}", ledger.display()).into());
    }
    let trail = AuditTrail::open(JsonlSink::open(&ledger)?)?;

    if verify {
        let report = trail.verify()?;
        if json_output {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("{} {}", "Ledger intact:".green().bold(), ledger.display());
            println!("  Entries:  {}", report.entries.to_string().white());
            println!(
                "  Last run: {}",
                report.last_run.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
            );
            println!("  Head:     {}", report.head_hash.dimmed());
        }
        return Ok(());
    }

    let mut filter = AuditFilter::new();
    if let Some(r) = run {
        filter = filter.run(r);
    } else if from_run.is_some() || to_run.is_some() {
        filter = filter.runs(from_run.unwrap_or(1), to_run.unwrap_or(u64::MAX));
    }
    if let Some(s) = severity {
        filter = filter.min_severity(s.parse::<Severity>()?);
    }
    if let Some(r) = rule {
        filter = filter.rule(r);
    }
    if let Some(f) = finding {
        filter = filter.finding(f);
    }
    filter = filter.between(parse_time(since)?, parse_time(until)?);

    let mut count = 0usize;
    for entry in trail.query(filter)? {
        let entry = entry?;
        if json_output {
            println!("{}", serde_json::to_string(&entry)?);
        } else {
            print_entry(&entry);
        }
        count += 1;
    }

    if !json_output {
        println!();
        println!("{} matching entries", count.to_string().white().bold());
    }

    Ok(())
}

fn parse_time(value: Option<String>) -> Result<Option<DateTime<Utc>>, Box<dyn std::error::Error>> {
    Ok(match value {
        Some(v) => Some(
            DateTime::parse_from_rfc3339(&v)
                .map_err(|e| format!("Invalid timestamp '{}': {}", v, e))?
                .with_timezone(&Utc),
        ),
        None => None,
    })
}

fn print_entry(entry: &AuditEntry) {
    let head = format!(
        "#{:<5} run {:<4} {}",
        entry.entry_id,
        entry.run_id,
        entry.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    let body = match &entry.event {
        AuditEvent::RunStarted {
            batch_id,
            record_count,
            ..
        } => format!("{} {} records from {}", "started".cyan(), record_count, batch_id),
        AuditEvent::Finding(f) => format!(
            "{} {} [{}] {} ({})",
            "finding".yellow(),
            f.severity,
            f.rule_id.cyan(),
            f.message,
            f.record_id
        ),
        AuditEvent::Remediation {
            finding_id,
            finding_run,
            from,
            to,
            note,
            ..
        } => {
            let mut line = format!(
                "{} {} (run {}) {} -> {}",
                "remediation".green(),
                finding_id,
                finding_run,
                from,
                to
            );
            if let Some(n) = note {
                line.push_str(&format!(": {}", n));
            }
            line
        }
        AuditEvent::RunCompleted {
            status,
            score,
            finding_count,
            ..
        } => format!(
            "{} {:?} score {:.3}, {} findings",
            "completed".cyan(),
            status,
            score,
            finding_count
        ),
    };
    println!("{} {} {}", head.dimmed(), entry.actor.white(), body);
}
