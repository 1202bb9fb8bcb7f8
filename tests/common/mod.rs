//! Common test utilities for integration tests
//!
//! Shared fixtures: entity batches, small lattices and configurations tuned
//! for deterministic runs.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use msk_fusion::domain::models::{
    AgentRegistration, Config, ConstraintLattice, ConstraintNode, EntityPayload,
    EntitySubmission, Geometry, LatticeDefinition, Modality, NodeValue, Predicate, Severity,
    TextSpan, Transition, TrustRegistry,
};
use tempfile::TempDir;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Initialize a test-writer subscriber. Safe to call repeatedly.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config for scripted runs: full relaxation, norm gate only, no
/// low-confidence resegmentation.
pub fn scripted_config(agents: &[(&str, f64)]) -> Config {
    let mut config = Config::default();
    config.convergence.relaxation = 1.0;
    config.convergence.entropy_gamma = 0.0;
    config.convergence.norm_epsilon = 0.01;
    config.harmonizer.resegmentation_floor = 0.0;
    config.agents.timeout_ms = 2_000;
    config.agents.registry = agents
        .iter()
        .map(|(id, trust)| AgentRegistration::new(*id, *trust))
        .collect();
    config
}

pub fn registry(config: &Config) -> Arc<TrustRegistry> {
    Arc::new(TrustRegistry::new(config.agents.registry.clone()).expect("valid registry"))
}

/// One derived node with no constraints.
pub fn single_node_lattice() -> Arc<ConstraintLattice> {
    Arc::new(
        ConstraintLattice::new(LatticeDefinition {
            nodes: vec![ConstraintNode::new("finding", Predicate::Derived)],
        })
        .expect("valid lattice"),
    )
}

/// Lesion workup lattice:
/// `lesion -> aggressive -> biopsy_indicated`, `benign` excludes `aggressive`.
pub fn lesion_lattice() -> Arc<ConstraintLattice> {
    Arc::new(
        ConstraintLattice::new(LatticeDefinition {
            nodes: vec![
                ConstraintNode::new(
                    "lesion",
                    Predicate::EntityPresent {
                        label: "lesion".to_string(),
                        kind: None,
                        min_confidence: 0.0,
                    },
                ),
                ConstraintNode::new(
                    "aggressive",
                    Predicate::Corroborated {
                        label: "lesion".to_string(),
                        modalities: vec![Modality::Segmentation, Modality::ClinicalText],
                    },
                )
                .requires(["lesion"]),
                ConstraintNode::new("benign", Predicate::Derived)
                    .requires(["lesion"])
                    .excludes(["aggressive"]),
                ConstraintNode::new("biopsy_indicated", Predicate::Derived)
                    .requires(["aggressive"]),
            ],
        })
        .expect("valid lattice"),
    )
}

pub fn set(node: &str, confidence: f64) -> Transition {
    Transition::new().with(node, NodeValue::asserted(confidence))
}

pub fn refute(node: &str, confidence: f64) -> Transition {
    Transition::new().with(node, NodeValue::refuted(confidence))
}

pub fn segmented_lesion(centroid: [f64; 3], confidence: f64) -> EntitySubmission {
    EntitySubmission::new(
        Modality::Segmentation,
        EntityPayload::Measurement {
            label: "lesion".to_string(),
            geometry: Geometry {
                centroid,
                bounding_box: None,
            },
            volume_mm3: Some(1_800.0),
        },
        confidence,
    )
    .with_embedding(vec![0.9, 0.1, 0.0])
    .observed_at(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
}

pub fn reported_lesion(confidence: f64) -> EntitySubmission {
    EntitySubmission::new(
        Modality::ClinicalText,
        EntityPayload::TextEntity {
            label: "lesion".to_string(),
            span: TextSpan {
                start: 12,
                end: 18,
                text: "lesion".to_string(),
            },
        },
        confidence,
    )
    .with_embedding(vec![0.88, 0.12, 0.01])
    .observed_at(Utc.with_ymd_and_hms(2025, 3, 2, 14, 0, 0).unwrap())
}

pub fn imaging_finding(label: &str, confidence: f64) -> EntitySubmission {
    EntitySubmission::new(
        Modality::Imaging,
        EntityPayload::Finding {
            label: label.to_string(),
            severity: Severity::Medium,
            region: None,
        },
        confidence,
    )
    .with_embedding(vec![0.1, 0.9, 0.2])
}
