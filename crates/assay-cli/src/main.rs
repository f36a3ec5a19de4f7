//! Assay CLI - quality control for clinical tabular records.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

/// Log to stderr so `--json` output on stdout stays machine-readable.
///
/// Respects `ASSAY_LOG`; defaults to `warn`, or `info` with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env("ASSAY_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Validate {
            file,
            rules,
            format,
            id_column,
            baseline,
            references,
            config,
            audit,
            actor,
            workers,
            fail_on,
            json,
        } => commands::validate::run(
            file, rules, format, id_column, baseline, references, config, audit, actor, workers, fail_on,
            json, cli.verbose,
        ),

        Commands::Baseline {
            file,
            rules,
            output,
            format,
            id_column,
            references,
            config,
        } => commands::baseline::run(
            file, rules, output, format, id_column, references, config, cli.verbose,
        ),

        Commands::Audit {
            ledger,
            verify,
            run,
            from_run,
            to_run,
            severity,
            rule,
            finding,
            since,
            until,
            json,
        } => commands::audit::run(
            ledger, verify, run, from_run, to_run, severity, rule, finding, since, until, json,
            cli.verbose,
        ),

        Commands::Remediate {
            ledger,
            run,
            finding,
            status,
            actor,
            note,
        } => commands::remediate::run(ledger, run, finding, status, actor, note, cli.verbose),

        Commands::Rules { file, domain, json } => commands::rules::run(file, domain, json, cli.verbose),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
