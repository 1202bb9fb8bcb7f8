//! `lattice`: inspect constraint lattice definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{list_table, output, CommandOutput};
use crate::infrastructure::lattice_loader::load_lattice;

#[derive(Args, Debug)]
pub struct LatticeArgs {
    #[command(subcommand)]
    pub command: LatticeCommands,
}

#[derive(Subcommand, Debug)]
pub enum LatticeCommands {
    /// Validate a lattice and print its topological order
    Check {
        /// Lattice file (YAML, or JSON by extension)
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
pub struct LatticeNodeOutput {
    pub id: String,
    pub requires: Vec<String>,
    pub excludes: Vec<String>,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct LatticeCheckOutput {
    pub path: PathBuf,
    pub nodes: Vec<LatticeNodeOutput>,
}

impl CommandOutput for LatticeCheckOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["#", "node", "requires", "excludes"]);
        for (position, node) in self.nodes.iter().enumerate() {
            table.add_row(vec![
                (position + 1).to_string(),
                node.id.clone(),
                node.requires.join(", "),
                node.excludes.join(", "),
            ]);
        }
        format!(
            "Lattice {} is valid ({} nodes, topological order):\n{table}",
            self.path.display(),
            self.nodes.len()
        )
    }
}

pub async fn execute(args: LatticeArgs, json_mode: bool) -> Result<()> {
    match args.command {
        LatticeCommands::Check { file } => {
            let lattice = load_lattice(&file)?;
            let nodes = lattice
                .topological_order()
                .iter()
                .filter_map(|id| lattice.node(id))
                .map(|node| LatticeNodeOutput {
                    id: node.id.to_string(),
                    requires: node.requires.iter().map(ToString::to_string).collect(),
                    excludes: node.excludes.iter().map(ToString::to_string).collect(),
                    description: node.description.clone(),
                })
                .collect();
            output(&LatticeCheckOutput { path: file, nodes }, json_mode);
            Ok(())
        }
    }
}
