//! Scripted agent for tests and replay.
//!
//! Plays back a fixed list of steps, one per call. Once the script is
//! exhausted the last step repeats.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{FusionError, FusionResult};
use crate::domain::models::{AgentId, ConstraintLattice, Transition};
use crate::domain::ports::{InferenceAgent, ProposalRequest};

/// One scripted reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Wait this long before replying.
    #[serde(default)]
    pub delay_ms: u64,
    /// Delta to propose. An absent delta proposes no change.
    #[serde(default)]
    pub propose: Option<Transition>,
    /// Fail the call with this reason instead of proposing.
    #[serde(default)]
    pub fail: Option<String>,
}

impl ScriptStep {
    pub fn propose(delta: Transition) -> Self {
        Self {
            propose: Some(delta),
            ..Self::default()
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            fail: Some(reason.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn delayed(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Script of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScript {
    pub id: AgentId,
    pub steps: Vec<ScriptStep>,
}

/// Script file: one script per agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptFile {
    #[serde(default)]
    pub agents: Vec<AgentScript>,
}

impl ScriptFile {
    /// Load a YAML (or JSON, which YAML accepts) script file.
    pub fn load(path: &Path) -> FusionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FusionError::Configuration(format!("cannot read script {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            FusionError::Configuration(format!("invalid script {}: {e}", path.display()))
        })
    }

    /// Every node the script proposes must exist in `lattice`.
    pub fn check_nodes(&self, lattice: &ConstraintLattice) -> FusionResult<()> {
        let proposed = self
            .agents
            .iter()
            .flat_map(|agent| &agent.steps)
            .filter_map(|step| step.propose.as_ref())
            .flat_map(|delta| delta.nodes());
        for node in proposed {
            if !lattice.contains(node) {
                return Err(FusionError::UnknownNode(node.clone()));
            }
        }
        Ok(())
    }

    pub fn into_agents(self) -> Vec<ScriptedAgent> {
        self.agents.into_iter().map(ScriptedAgent::from_script).collect()
    }
}

/// Agent replaying an [`AgentScript`].
#[derive(Debug)]
pub struct ScriptedAgent {
    id: AgentId,
    steps: Vec<ScriptStep>,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(id: impl Into<AgentId>, steps: Vec<ScriptStep>) -> Self {
        Self {
            id: id.into(),
            steps,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_script(script: AgentScript) -> Self {
        Self::new(script.id, script.steps)
    }

    /// Propose the same delta on every call.
    pub fn repeating(id: impl Into<AgentId>, delta: Transition) -> Self {
        Self::new(id, vec![ScriptStep::propose(delta)])
    }

    /// Propose each delta in turn, then keep repeating the last one.
    pub fn sequence(id: impl Into<AgentId>, deltas: Vec<Transition>) -> Self {
        Self::new(id, deltas.into_iter().map(ScriptStep::propose).collect())
    }

    /// Number of proposals requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceAgent for ScriptedAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    async fn propose(&self, _request: &ProposalRequest) -> FusionResult<Transition> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(step) = self.steps.get(call).or_else(|| self.steps.last()) else {
            return Ok(Transition::new());
        };

        if step.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }
        if let Some(reason) = &step.fail {
            return Err(FusionError::AgentFailed {
                agent_id: self.id.clone(),
                reason: reason.clone(),
            });
        }
        Ok(step.propose.clone().unwrap_or_default())
    }
}
