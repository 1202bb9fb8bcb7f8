//! Inference agent adapters.

pub mod evidence_agent;
pub mod scripted_agent;

pub use evidence_agent::EvidenceAgent;
pub use scripted_agent::{AgentScript, ScriptFile, ScriptStep, ScriptedAgent};
