//! CLI entry point for virtual-lab runs.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lab_experiment::agent::{AgentConfig, LabAgent};
use vessel_kernel::plate::{validate_design, PlateFormat, WellRecord};

/// Deterministic virtual biology laboratory runner.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single epistemic loop
    Run {
        /// Root seed for all RNG streams
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Well budget for the run
        #[arg(short, long, default_value = "240")]
        budget: f64,

        /// Maximum agent cycles
        #[arg(long, default_value = "40")]
        max_cycles: u64,

        /// Cell line under investigation
        #[arg(long, default_value = "A549")]
        cell_line: String,

        /// Compound under investigation
        #[arg(long, default_value = "rotenone")]
        compound: String,

        /// Dose in micromolar
        #[arg(long, default_value = "5.0")]
        dose_um: f64,

        /// Plate format for seeded vessels and well reads (96 or 384)
        #[arg(short, long, default_value = "96")]
        format: PlateFormat,

        /// TOML overlay merged into the built-in parameter catalogue
        #[arg(long)]
        params_overlay: Option<PathBuf>,

        /// Output directory for run artefacts
        #[arg(short, long, default_value = "runs")]
        output: PathBuf,

        /// Run name (prefixes every artefact file)
        #[arg(long, default_value = "run")]
        name: String,

        /// Disable debt enforcement (contaminates the run)
        #[arg(long)]
        disable_enforcement: bool,
    },

    /// Run the same configuration over a range of seeds
    Sweep {
        /// First seed, inclusive
        #[arg(long, default_value = "0")]
        seed_start: u64,

        /// Number of seeds
        #[arg(short = 'n', long, default_value = "5")]
        count: u64,

        /// Well budget per run
        #[arg(short, long, default_value = "240")]
        budget: f64,

        /// Output directory for run artefacts
        #[arg(short, long, default_value = "runs")]
        output: PathBuf,
    },

    /// Validate a plate design JSON file
    CheckDesign {
        /// Path to a JSON array of well records
        design: PathBuf,

        /// Declared plate format (96 or 384)
        #[arg(short, long, default_value = "96")]
        format: PlateFormat,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("lab_experiment=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            seed,
            budget,
            max_cycles,
            cell_line,
            compound,
            dose_um,
            format,
            params_overlay,
            output,
            name,
            disable_enforcement,
        } => {
            let config = AgentConfig {
                root_seed: seed,
                budget_wells: budget,
                max_cycles,
                cell_line,
                compound,
                dose_um,
                plate_format: format,
                params_overlay,
                out_dir: output,
                run_name: name,
                disable_enforcement: disable_enforcement
                    .then(|| "enforcement disabled from the command line".to_string()),
                ..AgentConfig::default()
            };
            let mut agent = LabAgent::new(config)?;
            let summary = agent.run()?;

            tracing::info!(
                run_id = %summary.run_id,
                status = ?summary.status,
                cycles = summary.cycles_completed,
                budget_remaining = summary.budget_remaining_wells,
                debt_bits = summary.debt_bits_final,
                time_in_gate = format!("{:.1}%", summary.time_in_gate_percent),
                "run complete"
            );
        }

        Commands::Sweep {
            seed_start,
            count,
            budget,
            output,
        } => {
            let mut statuses = Vec::with_capacity(count as usize);
            for seed in seed_start..seed_start + count {
                let config = AgentConfig {
                    root_seed: seed,
                    budget_wells: budget,
                    out_dir: output.clone(),
                    run_name: format!("sweep-{seed}"),
                    ..AgentConfig::default()
                };
                let mut agent = LabAgent::new(config)?;
                let summary = agent.run()?;
                tracing::info!(
                    seed,
                    status = ?summary.status,
                    cycles = summary.cycles_completed,
                    "sweep run complete"
                );
                statuses.push(summary.status);
            }
            tracing::info!(runs = statuses.len(), "sweep complete");
        }

        Commands::CheckDesign { design, format } => {
            let raw = std::fs::read_to_string(&design)?;
            let wells: Vec<WellRecord> = serde_json::from_str(&raw)?;
            validate_design(&wells, format)?;
            tracing::info!(
                wells = wells.len(),
                path = %design.display(),
                "plate design valid"
            );
        }
    }

    Ok(())
}
