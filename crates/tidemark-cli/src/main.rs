use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tidemark_core::{FingerprintError, PlanEntry, RebuildPlan, StaleReason};
use tidemark_runner::{BuildReport, Runner};

#[derive(Parser)]
#[command(name = "tidemark", version, about = "Pipeline coordinator for dated snapshot and report artifacts")]
struct Cli {
    /// Path to the pipeline configuration
    #[arg(long, default_value = "pipeline.yaml", global = true)]
    config: PathBuf,

    /// Override the state matrix location from the config
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report stale (date, artifact) pairs without building anything
    CheckStale {
        /// Check a single date instead of the configured policy
        #[arg(long)]
        date: Option<String>,
    },

    /// Print the dates the configured policy resolves to
    ResolveDates {
        #[arg(long)]
        date: Option<String>,
    },

    /// Print the current fingerprint of every configured definition
    Fingerprints,

    /// Execute the rebuild plan against the configured producer commands
    Run {
        /// Build a single date instead of the configured policy
        #[arg(long)]
        date: Option<String>,
        /// Restrict the plan to one artifact id
        #[arg(long)]
        artifact: Option<String>,
    },
}

fn parse_date(s: Option<String>) -> Result<Option<NaiveDate>> {
    s.map(|s| s.parse().with_context(|| format!("invalid date `{s}`, expected YYYY-MM-DD")))
        .transpose()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::CheckStale { date } => {
            let runner = Runner::open(&cli.config, cli.state.as_deref())?;
            let dates = runner.resolve(parse_date(date)?)?;
            let (plan, errors) = runner.plan(&dates)?;
            print_stale_report(&plan, &errors, &runner);
            if !plan.is_empty() {
                std::process::exit(1);
            }
        }
        Command::ResolveDates { date } => {
            let runner = Runner::open(&cli.config, cli.state.as_deref())?;
            for d in runner.resolve(parse_date(date)?)? {
                println!("{d}");
            }
        }
        Command::Fingerprints => {
            let runner = Runner::open(&cli.config, cli.state.as_deref())?;
            let (fingerprints, errors) = runner.fingerprints();
            for (id, fp) in fingerprints.iter() {
                println!("{id}: {}", fp.as_str());
            }
            for e in &errors {
                println!("{}: <unavailable> ({})", e.artifact_id, e.reason);
            }
        }
        Command::Run { date, artifact } => {
            let runner = Runner::open(&cli.config, cli.state.as_deref())?;
            let dates = runner.resolve(parse_date(date)?)?;
            let (mut plan, _) = runner.plan(&dates)?;
            if let Some(id) = artifact {
                plan.retain_artifact(&id);
            }
            if plan.is_empty() {
                println!("Nothing to build.");
                return Ok(());
            }

            println!("Building {} stale (date, artifact) pairs...", plan.len());
            let report = runner.execute(&plan)?;
            print_build_report(&report);
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_stale_report(plan: &RebuildPlan, errors: &[FingerprintError], runner: &Runner) {
    if plan.is_empty() {
        println!("All artifacts are up-to-date.");
        return;
    }

    let mut by_artifact: BTreeMap<&str, Vec<&PlanEntry>> = BTreeMap::new();
    for entry in &plan.entries {
        by_artifact.entry(&entry.id).or_default().push(entry);
    }

    println!("\nStaleness Report");
    println!("{}", "=".repeat(50));

    for (id, entries) in &by_artifact {
        let changed: Vec<_> = entries.iter().filter(|e| e.reason == StaleReason::DefinitionChanged).collect();
        let missing: Vec<_> = entries.iter().filter(|e| e.reason == StaleReason::Missing).collect();
        let dependency: Vec<_> = entries.iter().filter(|e| e.reason == StaleReason::DependencyStale).collect();

        if !changed.is_empty() {
            println!("\nArtifact '{id}' has been MODIFIED:");
            list_dates("Affected dates", &changed);
        }
        if !missing.is_empty() {
            println!("\nArtifact '{id}' - MISSING:");
            list_dates("Dates without a build", &missing);
        }
        if !dependency.is_empty() {
            println!("\nArtifact '{id}' - STALE DEPENDENCIES:");
            list_dates("Affected dates", &dependency);
        }
    }

    for e in errors {
        println!("\nArtifact '{}' cannot be fingerprinted: {}", e.artifact_id, e.reason);
    }

    // Artifacts with nothing to rebuild.
    let stale_ids: Vec<&str> = by_artifact.keys().copied().collect();
    let mut all_ids: Vec<String> = runner.config.sources.keys().cloned().collect();
    all_ids.extend(runner.config.reports.keys().cloned());
    all_ids.sort();
    for id in &all_ids {
        if !stale_ids.contains(&id.as_str()) {
            println!("\nArtifact '{id}' - OK (no changes)");
        }
    }

    println!("\nSummary: {} stale (date, artifact) pairs found", plan.len());
    println!("Run `tidemark run` to rebuild them");
}

fn list_dates(label: &str, entries: &[&&PlanEntry]) {
    println!("  {label} ({}):", entries.len());
    for e in entries.iter().take(5) {
        println!("    - {}", e.date);
    }
    if entries.len() > 5 {
        println!("    ... and {} more", entries.len() - 5);
    }
}

fn print_build_report(report: &BuildReport) {
    println!("\nBuilt: {}, Failed: {}", report.successes.len(), report.failures.len());
    if !report.failures.is_empty() {
        println!("\nFailed builds:");
        for f in &report.failures {
            println!("  {}/{}: {}", f.entry.date, f.entry.id, f.reason);
        }
    }
}
