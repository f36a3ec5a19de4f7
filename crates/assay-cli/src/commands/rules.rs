//! Rules command - check a rule-set document and list its rules.

use std::path::PathBuf;

use colored::Colorize;

use assay::RuleRegistry;

pub fn run(
    file: PathBuf,
    domain: Option<String>,
    json_output: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !file.exists() {
        return Err(format!("Rule set not found: {}", file.display()).into());
    }

    let registry = RuleRegistry::from_path(&file)?;
    let definitions: Vec<_> = match domain {
        Some(ref d) => registry.lookup(d),
        None => registry
            .domains()
            .into_iter()
            .flat_map(|d| registry.lookup(d))
            .collect(),
    };

    if json_output {
        let listing = serde_json::json!({
            "version": registry.version(),
            "digest": registry.digest(),
            "fields": registry.fields().len(),
            "cohorts": registry.cohorts().keys().collect::<Vec<_>>(),
            "rules": definitions,
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!(
        "{} {} ({})",
        "Rule set".cyan().bold(),
        registry.version().white().bold(),
        registry.digest().dimmed()
    );
    println!(
        "  {} fields, {} cohorts, {} rules",
        registry.fields().len(),
        registry.cohorts().len(),
        definitions.len()
    );
    println!();

    for def in definitions {
        let state = if def.enabled {
            "on".green()
        } else {
            "off".red()
        };
        println!(
            "  {:3} {:32} v{:<3} {:12} {:10} {:8}",
            state,
            def.id.white(),
            def.version,
            def.domain,
            def.kind.as_str(),
            def.severity.to_string()
        );
        if verbose {
            println!("      {} {}", "fields".dimmed(), def.fields.join(", "));
            println!("      {} {}", "parameters".dimmed(), def.parameters);
        }
    }

    Ok(())
}
