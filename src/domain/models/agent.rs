//! Agent identities, configured trust, and per-iteration agent outputs.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::entity::Modality;
use super::state::Transition;
use crate::domain::errors::{FusionError, FusionResult};

/// Stable identifier of an inference agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// An agent known to the run, with its configured trust score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentRegistration {
    pub id: AgentId,
    pub trust_score: f64,
    /// Modalities the built-in evidence agent reads for this id. Empty means
    /// it endorses the controller's candidate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modalities: Vec<Modality>,
}

impl AgentRegistration {
    pub fn new(id: impl Into<String>, trust_score: f64) -> Self {
        Self {
            id: AgentId::new(id),
            trust_score,
            modalities: Vec::new(),
        }
    }

    #[must_use]
    pub fn reading<I>(mut self, modalities: I) -> Self
    where
        I: IntoIterator<Item = Modality>,
    {
        self.modalities = modalities.into_iter().collect();
        self
    }
}

/// Per-agent reputation for one run.
///
/// Built from configuration and passed explicitly to the components that
/// need it. Registration order is the final tie-breaker in arbitration.
#[derive(Debug, Clone, Default)]
pub struct TrustRegistry {
    agents: Vec<AgentRegistration>,
    index: HashMap<AgentId, usize>,
}

impl TrustRegistry {
    pub fn new(registrations: Vec<AgentRegistration>) -> FusionResult<Self> {
        let mut index = HashMap::with_capacity(registrations.len());
        for (order, registration) in registrations.iter().enumerate() {
            if registration.id.as_str().trim().is_empty() {
                return Err(FusionError::Configuration(
                    "agent id cannot be empty".to_string(),
                ));
            }
            if !registration.trust_score.is_finite()
                || !(0.0..=1.0).contains(&registration.trust_score)
            {
                return Err(FusionError::Configuration(format!(
                    "trust score {} for agent {} outside [0, 1]",
                    registration.trust_score, registration.id
                )));
            }
            if index.insert(registration.id.clone(), order).is_some() {
                return Err(FusionError::Configuration(format!(
                    "agent {} registered twice",
                    registration.id
                )));
            }
        }
        Ok(Self {
            agents: registrations,
            index,
        })
    }

    pub fn trust(&self, id: &AgentId) -> Option<f64> {
        self.index.get(id).map(|order| self.agents[*order].trust_score)
    }

    pub fn registration_order(&self, id: &AgentId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.index.contains_key(id)
    }

    /// Registrations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentRegistration> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// One agent's proposed delta for the current iteration, stamped with the
/// configured trust score and the computed symbolic-coherence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_id: AgentId,
    pub trust_score: f64,
    pub coherence_score: f64,
    pub delta: Transition,
}

impl AgentOutput {
    pub fn new(
        agent_id: impl Into<AgentId>,
        trust_score: f64,
        coherence_score: f64,
        delta: Transition,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            trust_score,
            coherence_score,
            delta,
        }
    }

    /// `w · S`.
    pub fn weighted_score(&self) -> f64 {
        self.trust_score * self.coherence_score
    }

    /// Both scores are finite and inside [0, 1].
    pub fn has_valid_scores(&self) -> bool {
        [self.trust_score, self.coherence_score]
            .iter()
            .all(|s| s.is_finite() && (0.0..=1.0).contains(s))
    }
}
