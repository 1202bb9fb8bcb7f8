//! Fusion engine services.
//!
//! - `EntityRegistry`: canonical store of diagnostic entities
//! - `AffinityGraphBuilder`: cross-modality similarity graph
//! - `constraint_lattice`: transition validation on `ConstraintLattice`
//! - `proposal`: candidate deltas, coherence scoring, update function
//! - `Harmonizer`: trust-weighted arbitration
//! - `AuditLogger`: hash-chained audit log
//! - `ConvergenceController`: the iteration loop tying them together

pub mod affinity_graph;
pub mod audit_chain;
pub mod constraint_lattice;
pub mod convergence_controller;
pub mod entity_registry;
pub mod harmonizer;
pub mod proposal;

pub use affinity_graph::{cosine_similarity, AffinityGraphBuilder};
pub use audit_chain::{inputs_digest, is_intact, verify, verify_linkage, AuditLogger};
pub use convergence_controller::ConvergenceController;
pub use entity_registry::{EntityRegistry, IngestReport};
pub use harmonizer::Harmonizer;
pub use proposal::{coherence_score, relax, supporting_entities, CandidateProposer};
