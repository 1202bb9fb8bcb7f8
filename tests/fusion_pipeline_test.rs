//! Full pipeline: ingestion, affinity graph, evidence agents, convergence
//! and audit over a small lesion workup.

mod common;

use std::sync::Arc;

use common::{imaging_finding, lesion_lattice, reported_lesion, segmented_lesion};
use msk_fusion::adapters::EvidenceAgent;
use msk_fusion::domain::models::{AgentRegistration, Config, EdgeKind, Modality, NodeId};
use msk_fusion::services::{is_intact, AffinityGraphBuilder, ConvergenceController, EntityRegistry};
use msk_fusion::{InferenceAgent, TrustRegistry};
use tokio_util::sync::CancellationToken;

fn config() -> Config {
    let mut config = Config::default();
    config.agents.registry = vec![
        AgentRegistration::new("consensus", 0.95),
        AgentRegistration::new("radiology", 0.9).reading([Modality::Segmentation]),
        AgentRegistration::new("nlp", 0.6).reading([Modality::ClinicalText]),
    ];
    config
}

fn ingest(registry: &mut EntityRegistry) {
    let report = registry.ingest([
        segmented_lesion([10.0, 20.0, 30.0], 0.85),
        reported_lesion(0.75),
        imaging_finding("effusion", 0.6),
    ]);
    assert_eq!(report.accepted.len(), 3);
    assert!(report.rejected.is_empty());
}

#[test]
fn test_matching_lesions_are_linked() {
    let mut registry = EntityRegistry::new(Some(3));
    ingest(&mut registry);

    let graph = AffinityGraphBuilder::new(config().affinity)
        .build(registry.active_entities())
        .unwrap();
    let semantic: Vec<_> = graph
        .edges()
        .iter()
        .filter(|e| e.kind == EdgeKind::SemanticMatch)
        .collect();
    assert_eq!(semantic.len(), 1);
    let labels: Vec<&str> = [&semantic[0].source, &semantic[0].target]
        .iter()
        .map(|id| graph.entity(id).unwrap().label())
        .collect();
    assert_eq!(labels, vec!["lesion", "lesion"]);
}

#[tokio::test]
async fn test_lesion_workup_converges_consistently() {
    common::setup_test_logging();
    let config = config();
    let lattice = lesion_lattice();
    let trust = Arc::new(TrustRegistry::new(config.agents.registry.clone()).unwrap());
    let agents: Vec<Arc<dyn InferenceAgent>> = config
        .agents
        .registry
        .iter()
        .map(|r| {
            Arc::new(EvidenceAgent::new(r.id.clone()).restricted_to(r.modalities.iter().copied()))
                as Arc<dyn InferenceAgent>
        })
        .collect();
    let controller = ConvergenceController::new(&config, Arc::clone(&lattice), trust)
        .with_agents(agents);

    let mut registry = EntityRegistry::new(Some(3));
    ingest(&mut registry);
    let report = controller
        .run(&mut registry, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_converged(), "outcome: {:?}", report.outcome);
    assert!(report.final_state.get(&NodeId::new("lesion")).unwrap().holds());
    assert!(lattice.is_consistent(&report.final_state));
    assert!(is_intact(&report.audit_chain));
    assert_eq!(
        report.audit_chain.len() as u64,
        report.outcome.iterations() + 1
    );
    assert_eq!(report.diagnostics.malformed_entities, 0);
}
