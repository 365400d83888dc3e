//! FewTreat CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod run;
mod simulate;

#[derive(Parser)]
#[command(name = "fewtreat")]
#[command(about = "FewTreat - Resampling inference for panels with few treated clusters")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of inference tasks against a panel
    Run {
        /// Run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate a synthetic panel for demos and calibration studies
    Simulate {
        /// Output file for the panel (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of clusters; cluster 0 is the treated one
        #[arg(long, default_value = "51")]
        clusters: usize,

        /// Number of calendar periods, starting at 2000
        #[arg(long, default_value = "6")]
        periods: usize,

        /// Number of treated periods at the end of the window
        #[arg(long, default_value = "3")]
        post_periods: usize,

        /// Observations per cluster x period x group cell
        #[arg(long, default_value = "2")]
        obs_per_cell: usize,

        /// Collapse to a single group flag (two-way layout)
        #[arg(long)]
        single_group: bool,

        /// Shift injected into treated post observations
        #[arg(long, default_value = "0.0")]
        effect: f64,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Run { config } => run::cmd_run(&config),
        Commands::Simulate {
            output,
            clusters,
            periods,
            post_periods,
            obs_per_cell,
            single_group,
            effect,
            seed,
        } => simulate::cmd_simulate(
            output.as_ref(),
            clusters,
            periods,
            post_periods,
            obs_per_cell,
            !single_group,
            effect,
            seed,
        ),
        Commands::Version => {
            println!("fewtreat {}", ft_core::VERSION);
            Ok(())
        }
    }
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
