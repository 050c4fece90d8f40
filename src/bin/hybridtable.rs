//! Hybrid table benchmark binary
//!
//! Builds a table skeleton, fills its cells, reads it back and reports how
//! long each phase took.
//!
//! # Examples
//!
//! ```bash
//! # Default 100 x 10000 run
//! hybridtable run
//!
//! # Smaller, reproducible run with a JSON report
//! hybridtable run --columns 10 --rows 500 --seed 7 --report run.json
//!
//! # Show the effective configuration
//! hybridtable config --config bench.toml
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hybridtable::metrics;
use hybridtable::{BenchConfig, BenchmarkRunner, RunReport};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Hybrid skeleton/cell table benchmark
#[derive(Parser, Debug)]
#[command(name = "hybridtable")]
#[command(version = hybridtable::VERSION)]
#[command(about = "Hybrid skeleton/cell table benchmark", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "HYBRIDTABLE_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "HYBRIDTABLE_LOG_LEVEL")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the benchmark once
    Run(RunArgs),

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file
        #[arg(short, long, env = "HYBRIDTABLE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Configuration file
    #[arg(short, long, env = "HYBRIDTABLE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of columns
    #[arg(long)]
    columns: Option<usize>,

    /// Number of rows
    #[arg(long)]
    rows: Option<usize>,

    /// Maximum concurrent cell writes
    #[arg(long)]
    concurrency: Option<usize>,

    /// Row keys per bulk read
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seed for view shuffles and payloads
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the reconstruct and validate phases
    #[arg(long)]
    no_reconstruct: bool,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write Prometheus metrics in text format
    #[arg(long)]
    metrics: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut BenchConfig) {
        if let Some(columns) = self.columns {
            config.columns = columns;
        }
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
        if let Some(concurrency) = self.concurrency {
            config.fill.concurrency = concurrency;
        }
        if let Some(batch_size) = self.batch_size {
            config.reconstruct.batch_size = batch_size;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.no_reconstruct {
            config.reconstruct.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Config { config } => {
            let config = BenchConfig::load(config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("hybridtable {}", hybridtable::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "hybridtable.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(!cli.no_color)
                .pretty(),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

async fn run_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = BenchConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config.validate()?;

    metrics::init_metrics();
    info!(
        version = %hybridtable::VERSION,
        columns = config.columns,
        rows = config.rows,
        concurrency = config.fill.concurrency,
        "Benchmark configured"
    );

    let runner = BenchmarkRunner::with_memory_stores(config);
    let outcome = runner.run(runner.default_payload()).await?;
    let report = outcome.report;
    print_summary(&report);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }
    if let Some(path) = &args.metrics {
        std::fs::write(path, metrics::export_metrics())
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    if !report.succeeded() {
        error!(run_id = %report.run_id, "Benchmark run did not validate");
        anyhow::bail!("run {} incomplete", report.run_id);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("run       {}", report.run_id);
    println!("table     {} ({} columns x {} rows)", report.table_uid, report.column_count, report.row_count);
    for phase in &report.phases {
        println!("{:<14}{:>8} ms", phase.phase, phase.elapsed_ms);
    }
    println!(
        "fill      {} rows written, {} failed, {} retries",
        report.fill.succeeded,
        report.fill.failed.len(),
        report.fill.retries
    );
    if let Some(validation) = &report.validation {
        println!(
            "cells     {} of {} read back",
            validation.total_cells, validation.expected_cells
        );
        if !validation.missing_rows.is_empty() {
            warn!(rows = validation.missing_rows.len(), "Rows missing cells");
        }
    }
}
