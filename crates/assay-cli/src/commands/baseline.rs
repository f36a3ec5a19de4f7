//! Baseline command - compute and save statistical baselines.

use std::path::PathBuf;

use colored::Colorize;

use assay::{ReferenceData, RuleRegistry, ValidationEngine};

use super::{load_config, read_batch};
use crate::cli::InputFormat;

#[allow(clippy::too_many_arguments)]
pub fn run(
    file: PathBuf,
    rules: PathBuf,
    output: PathBuf,
    format: Option<InputFormat>,
    id_column: String,
    references: Option<PathBuf>,
    config: Option<PathBuf>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config.as_ref())?;
    let registry = RuleRegistry::from_path(&rules)?;
    let batch = read_batch(&file, format, &id_column, &registry)?;
    let references = match references {
        Some(p) => ReferenceData::load(p)?,
        None => ReferenceData::new(),
    };

    if registry.baseline_targets().is_empty() {
        return Err(format!("Rule set {} has no statistical rules", registry.version()).into());
    }

    println!(
        "{} {} ({} records)",
        "Computing baselines from".cyan().bold(),
        file.display().to_string().white(),
        batch.len()
    );

    let engine = ValidationEngine::new(config)?;
    let baselines = engine.compute_baselines(&batch, &registry, &references);
    let min_samples = engine.config().detector.min_samples;

    if verbose {
        println!();
        println!(
            "  {:16} {:12} {:12} {:>7} {:>10} {:>10} {:>10}",
            "field", "grouping", "cohort", "n", "median", "q1", "q3"
        );
        for b in baselines.iter() {
            let n = if b.is_sufficient(min_samples) {
                b.cohort_size().to_string().white()
            } else {
                b.cohort_size().to_string().red()
            };
            println!(
                "  {:16} {:12} {:12} {:>7} {:>10.2} {:>10.2} {:>10.2}",
                b.field, b.grouping, b.cohort, n, b.median, b.q1, b.q3
            );
        }
    }

    let thin = baselines.iter().filter(|b| !b.is_sufficient(min_samples)).count();
    baselines.save(&output)?;

    println!();
    println!(
        "{} {} baselines to {}",
        "Saved".green().bold(),
        baselines.len().to_string().white().bold(),
        output.display()
    );
    if thin > 0 {
        println!(
            "  {} cohort(s) below {} samples will use fallback ranges",
            thin.to_string().yellow(),
            min_samples
        );
    }

    Ok(())
}
