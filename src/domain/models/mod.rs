pub mod admissibility;
pub mod affinity;
pub mod agent;
pub mod audit;
pub mod config;
pub mod entity;
pub mod lattice;
pub mod run;
pub mod state;

pub use admissibility::{Admissibility, RejectionReason};
pub use affinity::{AffinityEdge, AffinityGraph, EdgeKind};
pub use agent::{AgentId, AgentOutput, AgentRegistration, TrustRegistry};
pub use audit::{compute_state_hash, digest_hex, AuditEntry, AuditRecord, GENESIS_SEED_HASH};
pub use config::{
    AffinityConfig, AgentsConfig, AuditConfig, Config, ConvergenceConfig, HarmonizerConfig,
    LoggingConfig,
};
pub use entity::{
    BoundingBox, DiagnosticEntity, EntityId, EntityKind, EntityPayload, EntitySubmission,
    Geometry, Modality, Severity, TextSpan,
};
pub use lattice::{ConstraintLattice, ConstraintNode, LatticeDefinition, NodeId, Predicate};
pub use run::{
    ConvergenceGate, IterationSummary, RejectedEntity, ResegmentationReason,
    ResegmentationRequest, RunDiagnostics, RunOutcome, RunReport,
};
pub use state::{FrozenStateVector, NodeValue, StateVector, Transition, Truth};
