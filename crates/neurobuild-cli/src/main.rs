//! # neurobuild CLI
//!
//! Build and inspect parameterized compartmental cells from SWC
//! reconstructions.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use itertools::Itertools;
use neurobuild_core::Mechanism;
use neurobuild_model::{CellBuilder, MODEL_ID, MORPHOLOGY_FILE};
use neurobuild_swc::read_swc;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "neurobuild")]
#[command(version = "0.1.0")]
#[command(about = "Compartmental cell construction from SWC morphologies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the parameterized cell from a reconstruction
    Build {
        /// SWC morphology file (defaults to the model's published reconstruction)
        #[arg(short, long)]
        morphology: Option<PathBuf>,
        /// Cell display name
        #[arg(short, long)]
        name: Option<String>,
        /// X offset (um)
        #[arg(short = 'x', long = "x-shift", default_value_t = 0.0)]
        x: f64,
        /// Y offset (um)
        #[arg(short = 'y', long = "y-shift", default_value_t = 0.0)]
        y: f64,
        /// Z offset (um)
        #[arg(short = 'z', long = "z-shift", default_value_t = 0.0)]
        z: f64,
        /// Emit the full cell as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Summarize an SWC reconstruction without building a cell
    Inspect {
        /// SWC morphology file
        morphology: PathBuf,
    },

    /// List the supported membrane mechanisms
    Mechanisms,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            morphology,
            name,
            x,
            y,
            z,
            json,
        } => {
            let path = morphology.unwrap_or_else(|| PathBuf::from(MORPHOLOGY_FILE));
            let mut builder = CellBuilder::new().morphology(&path).offset(x, y, z);
            if let Some(name) = name {
                builder = builder.name(name);
            }
            let cell = builder
                .build()
                .with_context(|| format!("building cell from {}", path.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&cell)?);
            } else {
                println!(
                    "{} {} (model {})",
                    "Built".green().bold(),
                    cell.to_string().cyan(),
                    MODEL_ID
                );
                println!(
                    "  {} soma, {} dend, {} axon sections; {} segments total",
                    cell.soma().len(),
                    cell.dend().len(),
                    cell.axon().len(),
                    cell.total_segments()
                );
                for section in cell.sections() {
                    println!(
                        "  {:<10} L {:>8.2} um  diam {:>6.2} um  nseg {:>3}  mechanisms {}",
                        section.name,
                        section.length,
                        section.diam,
                        section.nseg,
                        section.mechanisms().map(|m| m.mechanism.suffix()).join(", ")
                    );
                }
            }
        }

        Commands::Inspect { morphology } => {
            let nodes = read_swc(&morphology)
                .with_context(|| format!("reading {}", morphology.display()))?;
            println!(
                "{} {} ({} samples)",
                "Reconstruction".green().bold(),
                morphology.display(),
                nodes.len()
            );
            for (structure, count) in nodes
                .iter()
                .map(|n| n.structure)
                .counts()
                .into_iter()
                .sorted_by_key(|&(_, count)| std::cmp::Reverse(count))
            {
                println!("  {:?}: {}", structure, count);
            }
        }

        Commands::Mechanisms => {
            println!("{}", "Supported membrane mechanisms:".green().bold());
            println!();
            for mechanism in Mechanism::ALL {
                println!(
                    "  {:<12} {}",
                    mechanism.suffix().cyan(),
                    mechanism.parameter_names().join(", ")
                );
            }
        }
    }

    Ok(())
}
