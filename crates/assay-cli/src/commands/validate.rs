//! Validate command - run a batch through the engine and report findings.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;

use assay::{
    AuditTrail, BaselineSet, JsonlSink, QcResult, ReferenceData, RuleRegistry, RunStatus, Severity,
    ValidationEngine,
};

use super::{load_config, read_batch};
use crate::cli::InputFormat;

#[allow(clippy::too_many_arguments)]
pub fn run(
    file: PathBuf,
    rules: PathBuf,
    format: Option<InputFormat>,
    id_column: String,
    baseline: Option<PathBuf>,
    references: Option<PathBuf>,
    config: Option<PathBuf>,
    audit: Option<PathBuf>,
    actor: Option<String>,
    workers: Option<usize>,
    fail_on: Option<String>,
    json_output: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let fail_on: Option<Severity> = fail_on.map(|s| s.parse()).transpose()?;

    let mut config = load_config(config.as_ref())?;
    if let Some(w) = workers {
        config = config.with_workers(w);
    }
    if let Some(a) = actor {
        config.actor = a;
    }
    tracing::debug!(workers = config.workers, rule_timeout_ms = config.rule_timeout_ms, "engine configured");

    let registry = RuleRegistry::from_path(&rules)?;
    let batch = read_batch(&file, format, &id_column, &registry)?;
    let baselines = baseline.map(BaselineSet::load).transpose()?;
    let references = match references {
        Some(p) => ReferenceData::load(p)?,
        None => ReferenceData::new(),
    };

    if !json_output {
        println!(
            "{} {} ({} records, rule set {})",
            "Validating".cyan().bold(),
            file.display().to_string().white(),
            batch.len(),
            registry.version().white().bold()
        );
    }

    let mut engine = ValidationEngine::new(config)?;
    if let Some(ref ledger) = audit {
        engine = engine.with_audit(Arc::new(AuditTrail::open(JsonlSink::open(ledger)?)?));
    }

    let token = engine.cancel_token();
    ctrlc::set_handler(move || token.cancel())?;

    let result = engine.validate_with(&batch, &registry, baselines.as_ref(), &references)?;

    if json_output {
        println!("{}", result.to_json()?);
    } else {
        print_report(&result, verbose);
        if let (Some(ledger), Some(run_id)) = (audit.as_ref(), result.run_id) {
            println!(
                "{} run {} in {}",
                "Recorded".green().bold(),
                run_id.to_string().white().bold(),
                ledger.display()
            );
        }
    }

    if result.status == RunStatus::Incomplete {
        return Err("run was cancelled before every record was evaluated".into());
    }
    if let Some(threshold) = fail_on {
        let failing = result.failures(threshold).count();
        if failing > 0 {
            return Err(format!("{} finding(s) at or above {}", failing, threshold).into());
        }
    }

    Ok(())
}

fn print_report(result: &QcResult, verbose: bool) {
    let counts = &result.by_severity;
    println!();
    println!(
        "Found {} findings ({} critical, {} errors, {} warnings, {} info) in {} checks",
        result.findings.len().to_string().white().bold(),
        counts.critical.to_string().magenta(),
        counts.error.to_string().red(),
        counts.warning.to_string().yellow(),
        counts.info.to_string().blue(),
        result.total_checks
    );

    if !result.by_domain.is_empty() {
        println!();
        println!("{}", "By domain:".yellow().bold());
        for (domain, c) in &result.by_domain {
            println!(
                "  {:20} {:>4} {:>4} {:>4} {:>4}",
                domain,
                c.critical.to_string().magenta(),
                c.error.to_string().red(),
                c.warning.to_string().yellow(),
                c.info.to_string().blue()
            );
        }
    }

    let shown = if verbose { Severity::Info } else { Severity::Warning };
    let listed: Vec<_> = result.failures(shown).collect();
    if !listed.is_empty() {
        println!();
        println!("{}", "Findings:".yellow().bold());
        for f in listed {
            let label = match f.severity {
                Severity::Critical => f.severity.label().magenta().bold(),
                Severity::Error => f.severity.label().red(),
                Severity::Warning => f.severity.label().yellow(),
                Severity::Info => f.severity.label().blue(),
            };
            println!(
                "  {} {:8} [{}] {}",
                "•".dimmed(),
                label,
                f.rule_id.cyan(),
                f.message
            );
            println!("      {} {}", "record".dimmed(), f.record_id);
            if verbose {
                if let Some(ref observed) = f.evidence.observed {
                    println!("      {} {}", "observed".dimmed(), observed);
                }
                if let Some(ref expected) = f.evidence.expected {
                    println!("      {} {}", "expected".dimmed(), expected);
                }
            }
        }
    }

    println!();
    let score = result.score * 100.0;
    let score_str = format!("{:.1}", score);
    let score_color = if score >= 95.0 {
        score_str.green()
    } else if score >= 80.0 {
        score_str.yellow()
    } else {
        score_str.red()
    };
    println!("Quality score: {}%", score_color);
    println!("{}", result.summary().recommendation);
}
