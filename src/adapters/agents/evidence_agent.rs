//! Evidence agent.
//!
//! Re-derives a delta from the entities of the modalities it is restricted
//! to. With no restriction it endorses the controller's candidate as is.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::errors::FusionResult;
use crate::domain::models::{AffinityGraph, AgentId, Modality, Transition};
use crate::domain::ports::{InferenceAgent, ProposalRequest};
use crate::services::proposal::CandidateProposer;

/// Agent reading the affinity graph through a modality filter.
#[derive(Debug, Clone)]
pub struct EvidenceAgent {
    id: AgentId,
    modalities: BTreeSet<Modality>,
    proposer: CandidateProposer,
}

impl EvidenceAgent {
    /// Agent that sees every modality.
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            modalities: BTreeSet::new(),
            proposer: CandidateProposer::new(0.5),
        }
    }

    /// Restrict the agent to the given modalities.
    #[must_use]
    pub fn restricted_to<I>(mut self, modalities: I) -> Self
    where
        I: IntoIterator<Item = Modality>,
    {
        self.modalities = modalities.into_iter().collect();
        self
    }

    #[must_use]
    pub const fn with_assert_threshold(mut self, threshold: f64) -> Self {
        self.proposer = CandidateProposer::new(threshold);
        self
    }

    fn view(&self, graph: &AffinityGraph) -> AffinityGraph {
        let entities = graph
            .entities()
            .iter()
            .filter(|e| self.modalities.contains(&e.modality()))
            .cloned()
            .collect();
        AffinityGraph::from_parts(entities, graph.edges().to_vec())
    }
}

#[async_trait]
impl InferenceAgent for EvidenceAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    async fn propose(&self, request: &ProposalRequest) -> FusionResult<Transition> {
        if self.modalities.is_empty() {
            return Ok(request.candidate.clone());
        }
        let view = self.view(&request.graph);
        Ok(self
            .proposer
            .candidate_delta(&request.lattice, &view, &request.state))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::models::{
        ConstraintLattice, ConstraintNode, EntityPayload, EntitySubmission, LatticeDefinition,
        NodeValue, Predicate, Severity, StateVector, TextSpan,
    };

    fn request() -> ProposalRequest {
        let lattice = ConstraintLattice::new(LatticeDefinition {
            nodes: vec![ConstraintNode::new(
                "mass",
                Predicate::EntityPresent {
                    label: "mass".to_string(),
                    kind: None,
                    min_confidence: 0.0,
                },
            )],
        })
        .unwrap();
        let imaging = EntitySubmission::new(
            Modality::Imaging,
            EntityPayload::Finding {
                label: "mass".to_string(),
                severity: Severity::High,
                region: None,
            },
            0.9,
        )
        .seal();
        let text = EntitySubmission::new(
            Modality::ClinicalText,
            EntityPayload::TextEntity {
                label: "mass".to_string(),
                span: TextSpan {
                    start: 0,
                    end: 4,
                    text: "mass".to_string(),
                },
            },
            0.3,
        )
        .seal();
        ProposalRequest {
            iteration: 1,
            state: StateVector::initial(&lattice),
            candidate: Transition::new().with("mass", NodeValue::asserted(0.9)),
            graph: Arc::new(AffinityGraph::from_parts(vec![imaging, text], vec![])),
            lattice: Arc::new(lattice),
        }
    }

    #[tokio::test]
    async fn test_unrestricted_endorses_candidate() {
        let request = request();
        let delta = EvidenceAgent::new("all").propose(&request).await.unwrap();
        assert_eq!(delta, request.candidate);
    }

    #[tokio::test]
    async fn test_restricted_agent_reads_own_modality() {
        let request = request();
        let nlp = EvidenceAgent::new("nlp").restricted_to([Modality::ClinicalText]);
        let delta = nlp.propose(&request).await.unwrap();
        let value = delta.get(&"mass".into()).unwrap();
        assert!(!value.holds());
        assert!((value.confidence - 0.7).abs() < 1e-12);
    }
}
