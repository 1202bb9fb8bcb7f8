//! `graph`: build the affinity graph of an entity batch.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::load_submissions;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{AffinityEdge, Config, RejectedEntity};
use crate::services::{AffinityGraphBuilder, EntityRegistry};

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// JSON array of entity submissions
    #[arg(short, long)]
    pub entities: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct GraphEntityOutput {
    pub id: String,
    pub modality: String,
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct GraphOutput {
    pub entities: Vec<GraphEntityOutput>,
    pub edges: Vec<AffinityEdge>,
    pub rejected: Vec<RejectedEntity>,
}

impl CommandOutput for GraphOutput {
    fn to_human(&self) -> String {
        let label_of = |id: &str| {
            self.entities
                .iter()
                .find(|e| e.id == id)
                .map_or_else(String::new, |e| truncate(&e.label, 24))
        };

        let mut lines = vec![format!(
            "{} entities, {} edges",
            self.entities.len(),
            self.edges.len()
        )];
        if !self.edges.is_empty() {
            let mut table = list_table(&["source", "target", "kind", "weight"]);
            for edge in &self.edges {
                table.add_row(vec![
                    format!("{} {}", edge.source.short(), label_of(edge.source.as_str())),
                    format!("{} {}", edge.target.short(), label_of(edge.target.as_str())),
                    edge.kind.as_str().to_string(),
                    format!("{:.3}", edge.weight),
                ]);
            }
            lines.push(table.to_string());
        }
        if !self.rejected.is_empty() {
            lines.push(format!("{} entities rejected:", self.rejected.len()));
            for rejected in &self.rejected {
                let id = rejected
                    .entity_id
                    .as_ref()
                    .map_or("<unidentified>", |id| id.short());
                lines.push(format!("  {id}: {}", rejected.reason));
            }
        }
        lines.join("\n")
    }
}

pub async fn execute(args: GraphArgs, config: &Config, json_mode: bool) -> Result<()> {
    let mut registry = EntityRegistry::new(config.affinity.embedding_dim);
    registry.ingest(load_submissions(&args.entities)?);

    let builder = AffinityGraphBuilder::new(config.affinity.clone());
    let (graph, left_out) = builder.build_lenient(registry.active_entities());
    let mut rejected = registry.rejected().to_vec();
    rejected.extend(left_out);

    let entities = graph
        .entities()
        .iter()
        .map(|e| GraphEntityOutput {
            id: e.id().to_string(),
            modality: e.modality().to_string(),
            label: e.label().to_string(),
        })
        .collect();
    output(
        &GraphOutput {
            entities,
            edges: graph.edges().to_vec(),
            rejected,
        },
        json_mode,
    );
    Ok(())
}
