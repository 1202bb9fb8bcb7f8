//! Inference agent port.
//!
//! Agents only ever see the previously committed state, never each other's
//! output for the current iteration, so there are no cycles between them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::FusionResult;
use crate::domain::models::{AffinityGraph, AgentId, ConstraintLattice, StateVector, Transition};

/// Everything an agent receives for one iteration.
#[derive(Debug, Clone)]
pub struct ProposalRequest {
    /// Iteration being proposed for (committed iteration + 1).
    pub iteration: u64,
    /// Last committed state.
    pub state: StateVector,
    /// Candidate delta derived from the affinity graph and the lattice.
    pub candidate: Transition,
    pub graph: Arc<AffinityGraph>,
    pub lattice: Arc<ConstraintLattice>,
}

/// An independent agent proposing a delta for the current iteration.
///
/// Trust is never self-reported: the controller stamps each proposal with
/// the score configured for `id()`.
#[async_trait]
pub trait InferenceAgent: Send + Sync {
    /// Stable agent id, matched against the trust registry.
    fn id(&self) -> &AgentId;

    /// Propose a delta on top of `request.state`.
    async fn propose(&self, request: &ProposalRequest) -> FusionResult<Transition>;
}
