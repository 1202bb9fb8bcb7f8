//! Adapters implementing the domain ports.

pub mod agents;
pub mod memory_audit_store;
pub mod resegmentation;

pub use agents::{AgentScript, EvidenceAgent, ScriptFile, ScriptStep, ScriptedAgent};
pub use memory_audit_store::InMemoryAuditStore;
pub use resegmentation::{NullResegmentation, ScriptedResegmentation};
