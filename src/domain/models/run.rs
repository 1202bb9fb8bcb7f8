//! Run results: outcome, diagnostics, resegmentation signals, report.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentId;
use super::audit::AuditRecord;
use super::entity::EntityId;
use super::state::FrozenStateVector;
use crate::domain::errors::{FusionError, FusionResult};

/// Which stopping gate ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceGate {
    /// `‖v_{t+1} - v_t‖ < ε`
    Norm,
    /// `ΔH < γ`
    Entropy,
    /// Both gates fired on the same iteration.
    Both,
}

impl ConvergenceGate {
    /// Either gate suffices.
    pub const fn from_flags(norm: bool, entropy: bool) -> Option<Self> {
        match (norm, entropy) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::Norm),
            (false, true) => Some(Self::Entropy),
            (false, false) => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Norm => "norm",
            Self::Entropy => "entropy",
            Self::Both => "both",
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Converged { gate: ConvergenceGate, iterations: u64 },
    /// Iteration ceiling reached; the state is kept for human review.
    ConvergenceTimeout { iterations: u64 },
    /// Cancelled between iterations.
    Cancelled { iterations: u64 },
}

impl RunOutcome {
    pub const fn iterations(&self) -> u64 {
        match self {
            Self::Converged { iterations, .. }
            | Self::ConvergenceTimeout { iterations }
            | Self::Cancelled { iterations } => *iterations,
        }
    }
}

/// Counters for every non-fatal error seen during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub malformed_entities: u64,
    pub constraint_rejections: u64,
    pub agent_timeouts: u64,
    pub agent_failures: u64,
    pub unregistered_outputs: u64,
    pub invalid_outputs: u64,
    pub resegmentation_retries: u64,
    pub low_confidence_resegmentations: u64,
}

impl RunDiagnostics {
    pub const fn total(&self) -> u64 {
        self.malformed_entities
            + self.constraint_rejections
            + self.agent_timeouts
            + self.agent_failures
            + self.unregistered_outputs
            + self.invalid_outputs
            + self.resegmentation_retries
            + self.low_confidence_resegmentations
    }
}

/// Why an entity should be re-derived from source data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResegmentationReason {
    /// Every agent failed or timed out.
    NoCandidates,
    /// The winning proposal scored below the configured floor.
    LowConfidence { score: f64, floor: f64 },
}

/// Signal to the segmentation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResegmentationRequest {
    pub entity_id: EntityId,
    pub iteration: u64,
    pub reason: ResegmentationReason,
}

/// An entity turned away at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedEntity {
    pub entity_id: Option<EntityId>,
    pub reason: String,
}

/// Per-iteration trace kept in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u64,
    /// `None` when the controller's own candidate delta was committed.
    pub selected_agent: Option<AgentId>,
    pub weighted_score: f64,
    pub candidates: usize,
    pub rejected_candidates: usize,
    pub changed_nodes: usize,
    pub norm: f64,
    pub entropy_delta: f64,
}

/// Everything a run produces for downstream persistence and review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub final_state: FrozenStateVector,
    pub audit_chain: Vec<AuditRecord>,
    pub iterations: Vec<IterationSummary>,
    pub diagnostics: RunDiagnostics,
    pub resegmentation_requests: Vec<ResegmentationRequest>,
    pub rejected_entities: Vec<RejectedEntity>,
}

impl RunReport {
    pub const fn is_converged(&self) -> bool {
        matches!(self.outcome, RunOutcome::Converged { .. })
    }

    /// The final state, or `ConvergenceTimeout` if no gate was reached.
    pub fn ensure_converged(&self) -> FusionResult<&FrozenStateVector> {
        match self.outcome {
            RunOutcome::ConvergenceTimeout { iterations } => {
                Err(FusionError::ConvergenceTimeout { iterations })
            }
            _ => Ok(&self.final_state),
        }
    }
}
