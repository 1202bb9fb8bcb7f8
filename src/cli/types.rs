//! CLI type definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::{graph::GraphArgs, lattice::LatticeArgs, run::RunArgs, verify::VerifyArgs};

#[derive(Parser)]
#[command(name = "msk-fusion")]
#[command(about = "MSK-IO multi-modal diagnostic fusion engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (replaces .msk-fusion/config.yaml and local.yaml)
    #[arg(short, long, global = true, env = "MSK_FUSION_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest entities and run the fusion loop to convergence
    Run(RunArgs),
    /// Verify a persisted audit chain
    Verify(VerifyArgs),
    /// Constraint lattice commands
    Lattice(LatticeArgs),
    /// Build and print the affinity graph of an entity batch
    Graph(GraphArgs),
}
