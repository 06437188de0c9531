//! Kolosal grid CLI
//!
//! Command-line front end: run a grid, preview its configurations, or list
//! the built-in techniques.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::grid::{GridReport, GridRunner, RowStatus, RunOptions};
use crate::io::{ArtifactSink, DataLoader, DataSource, FileExporter};
use crate::registry::{TechniqueRegistry, BUILTIN_CATALOG};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString    { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-grid")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run every combination of preprocessing and model techniques and keep the best")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the grid described by a settings file
    Run {
        /// Settings file (JSON)
        #[arg(short, long)]
        settings: PathBuf,

        /// Input data file (CSV, JSON lines, or Parquet)
        #[arg(short, long)]
        data: PathBuf,

        /// Output directory for results and configurations
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker threads; overrides recipes.parallelism
        #[arg(short = 'j', long)]
        parallelism: Option<usize>,

        /// Mark columns with fewer unique values as categorical on load
        #[arg(long)]
        categorize: Option<usize>,
    },

    /// List the configurations a settings file expands to
    Plan {
        /// Settings file (JSON)
        #[arg(short, long)]
        settings: PathBuf,
    },

    /// List the built-in techniques per stage
    Techniques,
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_run(
    settings_path: &Path,
    data_path: &Path,
    output: Option<&Path>,
    parallelism: Option<usize>,
    categorize: Option<usize>,
) -> anyhow::Result<()> {
    section("Run");

    let settings = Settings::from_file(settings_path)?;
    let mut runner = GridRunner::from_settings(Arc::new(TechniqueRegistry::builtin()), settings)?;

    step_run("Loading data");
    let start = Instant::now();
    let mut loader = DataLoader::new();
    if let Some(threshold) = categorize {
        loader = loader.with_auto_categorize(threshold);
    }
    let mut dataset = loader.load(data_path, &runner.config().label)?;
    step_done(&format!(
        "{} rows × {} cols in {:?}",
        dataset.n_rows(),
        dataset.source().width(),
        start.elapsed()
    ));

    let mut options = RunOptions::new();
    if let Some(threads) = parallelism {
        options = options.with_parallelism(threads);
    }

    let total = runner.generator()?.count(&runner.config().techniques)?;
    step_run(&format!("Running {} configurations", total));
    let start = Instant::now();
    let mut exporter = match output {
        Some(dir) => Some(FileExporter::new(dir)?),
        None => None,
    };
    let report = runner.run_with_sink(
        &mut dataset,
        &options,
        exporter.as_mut().map(|e| e as &mut dyn ArtifactSink),
    )?;
    step_done(&format!("{:?}", start.elapsed()));

    print_results(&report);
    print_best(&report);

    if let Some(exporter) = &exporter {
        println!("  {:<16} {}", muted("Output"), exporter.base_dir().display());
        println!();
    }
    Ok(())
}

pub fn cmd_plan(settings_path: &Path) -> anyhow::Result<()> {
    section("Plan");

    let settings = Settings::from_file(settings_path)?;
    let runner = GridRunner::from_settings(Arc::new(TechniqueRegistry::builtin()), settings)?;
    let generator = runner.generator()?;
    let plan = generator.plan(&runner.config().techniques)?;

    print!("  {:<6}", muted("#"));
    for stage in generator.stage_order().iter() {
        print!(" {:<18}", muted(stage));
    }
    println!();
    println!("  {}", dim(&"─".repeat(6 + 19 * generator.stage_order().len())));

    for (i, techniques) in plan.iter().enumerate() {
        print!("  {:<6}", i + 1);
        for technique in techniques {
            let cell = if technique == crate::registry::NONE_TECHNIQUE {
                dim(technique)
            } else {
                technique.white()
            };
            print!(" {:<18}", cell);
        }
        println!();
    }

    println!();
    println!("  {} {}", muted("configurations:"), plan.len());
    println!();
    Ok(())
}

pub fn cmd_techniques() -> anyhow::Result<()> {
    section("Techniques");

    println!("  {:<12} {:<20} {}", muted("Stage"), muted("Technique"), muted("Source"));
    println!("  {}", dim(&"─".repeat(56)));
    for entry in BUILTIN_CATALOG {
        println!(
            "  {:<12} {:<20} {}",
            entry.stage,
            entry.technique.white(),
            dim(&entry.locator().to_string())
        );
    }
    println!();
    Ok(())
}

// ─── Reporting ─────────────────────────────────────────────────────────────────

pub fn print_results(report: &GridReport) {
    let table = &report.results;
    let metric = report.best.metric();

    println!();
    println!(
        "  {:<6} {:<12} {:<36} {:>10}",
        muted("#"),
        muted("Split"),
        muted("Techniques"),
        muted(metric)
    );
    println!("  {}", dim(&"─".repeat(68)));

    for row in table.rows() {
        let techniques = row
            .stage_techniques
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join(" › ");
        let score = match (&row.status, row.score(metric)) {
            (RowStatus::Succeeded, Some(s)) => format!("{:.4}", s).white(),
            (RowStatus::Succeeded, None) => dim("n/a"),
            (RowStatus::Failed { kind, .. }, _) => kind.red(),
        };
        println!(
            "  {:<6} {:<12} {:<36} {:>10}",
            row.configuration_number,
            row.data_split.as_str(),
            techniques,
            score
        );
    }
    println!("  {}", dim(&"─".repeat(68)));

    if report.aborted {
        println!(
            "  {} {} of {} configurations ran",
            "cancelled".yellow(),
            report.configurations_run,
            report.configurations_total
        );
    }
}

/// Print the winning configuration; failed rows are never considered
pub fn print_best(report: &GridReport) {
    println!();
    match report.best_row().filter(|row| row.is_success()) {
        Some(row) => {
            println!(
                "  {} {} {} {:.4}",
                ok("best"),
                format!("configuration {}", row.configuration_number).white().bold(),
                muted(&format!("{} ({}):", report.best.metric(), row.data_split)),
                report.best.best_score().unwrap_or(f64::NAN)
            );
            for (stage, technique) in &row.stage_techniques {
                println!("  {:<16} {}", muted(stage), technique);
            }
        }
        None => println!("  {}", "no configuration succeeded".yellow()),
    }
    println!();
}
