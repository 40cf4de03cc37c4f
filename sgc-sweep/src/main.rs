//! sgc-sweep - Subgenre classification sweep runner
//!
//! Subcommands:
//! - `run`: evaluate the whole grid (or resume from the run journal)
//! - `plan`: print the grid dimensions without evaluating anything
//! - `summarize`: rebuild result tables and summaries from the run journal

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sgc_common::config::resolve_config_path;
use sgc_sweep::config::{CONFIG_ENV_VAR, CONFIG_FILE_NAME};
use sgc_sweep::{RunOptions, Sweep, SweepConfiguration};
use tokio::signal;
use tracing::{info, warn};

/// Command-line arguments for sgc-sweep
#[derive(Parser, Debug)]
#[command(name = "sgc-sweep")]
#[command(about = "Comparative subgenre classification experiment sweep")]
#[command(version)]
struct Args {
    /// Sweep configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate every grid cell and write the result tables
    Run {
        /// Skip cells already completed in the run journal
        #[arg(long)]
        resume: bool,

        /// Worker threads (overrides the configuration)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Print the grid axes and size
    Plan,
    /// Rebuild tables and summaries from the run journal
    Summarize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR, CONFIG_FILE_NAME)
        .context("Failed to locate sweep configuration")?;
    let mut config = SweepConfiguration::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    sgc_common::logging::init(&config.logging).context("Failed to initialize logging")?;
    info!(
        "Starting sgc-sweep v{} with {}",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    match args.command {
        Command::Run { resume, workers } => {
            if workers.is_some() {
                config.workers = workers;
            }
            let sweep = Sweep::new(config).context("Invalid sweep configuration")?;

            let cancel = sweep.cancellation_token();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing cells in flight");
                    cancel.cancel();
                }
            });

            let report = sweep
                .run(RunOptions { resume })
                .await
                .context("Sweep failed")?;

            println!(
                "{} cells: {} succeeded, {} failed ({} resumed){}",
                report.total_cells,
                report.succeeded,
                report.failed_total(),
                report.resumed,
                if report.cancelled { ", cancelled" } else { "" }
            );
            for (kind, count) in &report.failed {
                println!("  {}: {}", kind.as_str(), count);
            }
            if report.stale_records > 0 {
                println!(
                    "{} journal records from other settings were ignored",
                    report.stale_records
                );
            }
        }
        Command::Plan => {
            let sweep = Sweep::new(config).context("Invalid sweep configuration")?;
            let plan = sweep.plan();
            println!("contrasts ({}):", plan.contrasts.len());
            for contrast in &plan.contrasts {
                println!("  {}", contrast);
            }
            println!("feature keys ({}):", plan.feature_keys.len());
            for key in &plan.feature_keys {
                println!("  {}", key);
            }
            println!("classifiers ({}):", plan.classifiers.len());
            for classifier in &plan.classifiers {
                println!("  {}", classifier);
            }
            println!("repetitions: {}", plan.repetitions);
            println!("folds: {}", plan.folds);
            println!("total cells: {}", plan.total_cells);
        }
        Command::Summarize => {
            let sweep = Sweep::new(config).context("Invalid sweep configuration")?;
            let written = sweep
                .summarize_journal()
                .context("Failed to summarize run journal")?;
            for path in written {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
