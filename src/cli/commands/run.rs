//! `run`: ingest a batch, fuse it and print the outcome.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::load_submissions;
use crate::adapters::{EvidenceAgent, ScriptFile};
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::errors::FusionError;
use crate::domain::models::{Config, ConstraintLattice, RunReport, TrustRegistry};
use crate::domain::ports::InferenceAgent;
use crate::infrastructure::lattice_loader::load_lattice;
use crate::infrastructure::persistence::JsonlAuditStore;
use crate::services::{AuditLogger, ConvergenceController, EntityRegistry};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON array of entity submissions
    #[arg(short, long)]
    pub entities: PathBuf,

    /// Constraint lattice (YAML, or JSON by extension). Defaults to `lattice_path`
    #[arg(short, long)]
    pub lattice: Option<PathBuf>,

    /// Agent script (YAML) replacing the built-in evidence agents
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Write the audit chain here as JSONL. Defaults to `audit.chain_path`
    #[arg(short, long)]
    pub audit_out: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    #[serde(flatten)]
    pub report: RunReport,
    pub audit_path: Option<PathBuf>,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let mut lines = vec![
            format!("Run {}", report.run_id),
            format!("Outcome: {}", describe_outcome(report)),
            format!(
                "Audit chain: {} entries{}",
                report.audit_chain.len(),
                self.audit_path
                    .as_ref()
                    .map(|p| format!(" ({})", p.display()))
                    .unwrap_or_default()
            ),
            String::new(),
        ];

        let mut state = list_table(&["node", "truth", "confidence"]);
        for (node, value) in report.final_state.values() {
            state.add_row(vec![
                node.to_string(),
                value.truth.as_str().to_string(),
                format!("{:.3}", value.confidence),
            ]);
        }
        lines.push(state.to_string());

        let d = &report.diagnostics;
        lines.push(String::new());
        if d.total() == 0 {
            lines.push("Diagnostics: none".to_string());
        } else {
            let mut diagnostics = list_table(&["diagnostic", "count"]);
            for (name, count) in [
                ("malformed entities", d.malformed_entities),
                ("constraint rejections", d.constraint_rejections),
                ("agent timeouts", d.agent_timeouts),
                ("agent failures", d.agent_failures),
                ("unregistered outputs", d.unregistered_outputs),
                ("invalid outputs", d.invalid_outputs),
                ("resegmentation retries", d.resegmentation_retries),
                ("low-confidence resegmentations", d.low_confidence_resegmentations),
            ] {
                if count > 0 {
                    diagnostics.add_row(vec![name.to_string(), count.to_string()]);
                }
            }
            lines.push(diagnostics.to_string());
        }

        if !report.resegmentation_requests.is_empty() {
            lines.push(format!(
                "\n{} resegmentation request(s) issued",
                report.resegmentation_requests.len()
            ));
        }
        lines.join("\n")
    }
}

fn describe_outcome(report: &RunReport) -> String {
    use crate::domain::models::RunOutcome;
    match report.outcome {
        RunOutcome::Converged { gate, iterations } => {
            format!("converged after {iterations} iteration(s) ({} gate)", gate.as_str())
        }
        RunOutcome::ConvergenceTimeout { iterations } => {
            format!("no convergence after {iterations} iteration(s); state kept for review")
        }
        RunOutcome::Cancelled { iterations } => {
            format!("cancelled after {iterations} iteration(s)")
        }
    }
}

fn build_agents(
    args: &RunArgs,
    config: &Config,
    lattice: &ConstraintLattice,
) -> Result<Vec<Arc<dyn InferenceAgent>>> {
    if let Some(script) = &args.script {
        let script = ScriptFile::load(script)?;
        script.check_nodes(lattice)?;
        let agents = script.into_agents();
        return Ok(agents
            .into_iter()
            .map(|agent| Arc::new(agent) as Arc<dyn InferenceAgent>)
            .collect());
    }
    Ok(config
        .agents
        .registry
        .iter()
        .map(|registration| {
            let agent = EvidenceAgent::new(registration.id.clone())
                .restricted_to(registration.modalities.iter().copied())
                .with_assert_threshold(config.convergence.assert_threshold);
            Arc::new(agent) as Arc<dyn InferenceAgent>
        })
        .collect())
}

pub async fn execute(args: RunArgs, config: &Config, json_mode: bool) -> Result<()> {
    let Some(lattice_path) = args.lattice.clone().or_else(|| config.lattice_path.clone()) else {
        bail!("No constraint lattice given: pass --lattice or set lattice_path");
    };
    let lattice = Arc::new(load_lattice(&lattice_path)?);
    let registry = Arc::new(
        TrustRegistry::new(config.agents.registry.clone()).context("Invalid agent registry")?,
    );

    let mut entities = EntityRegistry::new(config.affinity.embedding_dim);
    let ingest = entities.ingest(load_submissions(&args.entities)?);
    info!(
        accepted = ingest.accepted.len(),
        duplicates = ingest.duplicates,
        rejected = ingest.rejected.len(),
        "Ingested entity batch"
    );

    let audit_path = args.audit_out.clone().or_else(|| config.audit.chain_path.clone());
    let audit = match &audit_path {
        Some(path) => Arc::new(AuditLogger::with_store(Arc::new(
            JsonlAuditStore::create(path.clone()).await?,
        ))),
        None => Arc::new(AuditLogger::new()),
    };

    let agents = build_agents(&args, config, &lattice)?;
    let controller = ConvergenceController::new(config, lattice, registry)
        .with_agents(agents)
        .with_audit_logger(audit);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current iteration");
            on_interrupt.cancel();
        }
    });

    let report = controller.run(&mut entities, cancel).await?;
    let timed_out = report.ensure_converged().err();

    output(&RunOutput { report, audit_path }, json_mode);

    match timed_out {
        Some(err @ FusionError::ConvergenceTimeout { .. }) => Err(err.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentRegistration, ConstraintNode, LatticeDefinition, Predicate};

    fn lattice() -> ConstraintLattice {
        ConstraintLattice::new(LatticeDefinition {
            nodes: vec![ConstraintNode::new("finding", Predicate::Derived)],
        })
        .unwrap()
    }

    fn args(script: Option<PathBuf>) -> RunArgs {
        RunArgs {
            entities: PathBuf::from("entities.json"),
            lattice: None,
            script,
            audit_out: None,
        }
    }

    #[test]
    fn test_one_evidence_agent_per_registration() {
        let mut config = Config::default();
        config.agents.registry = vec![
            AgentRegistration::new("radiology", 0.9),
            AgentRegistration::new("nlp", 0.6),
        ];
        let agents = build_agents(&args(None), &config, &lattice()).unwrap();
        let ids: Vec<&str> = agents.iter().map(|a| a.id().as_str()).collect();
        assert_eq!(ids, vec!["radiology", "nlp"]);
    }

    #[test]
    fn test_script_replaces_registry_agents() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agents:\n  - id: scripted\n    steps: []").unwrap();
        file.flush().unwrap();

        let mut config = Config::default();
        config.agents.registry = vec![AgentRegistration::new("radiology", 0.9)];
        let agents = build_agents(&args(Some(file.path().to_path_buf())), &config, &lattice()).unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id().as_str(), "scripted");
    }

    #[test]
    fn test_script_with_unknown_node_is_refused() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "agents:\n  - id: scripted\n    steps:\n      - propose:\n          ghost: {{ truth: \"true\", confidence: 0.8 }}"
        )
        .unwrap();
        file.flush().unwrap();

        let err = build_agents(&args(Some(file.path().to_path_buf())), &Config::default(), &lattice())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unknown constraint node: ghost"));
    }

    #[tokio::test]
    async fn test_missing_lattice_is_an_error() {
        let err = execute(args(None), &Config::default(), true).await.unwrap_err();
        assert!(err.to_string().contains("No constraint lattice"));
    }
}
