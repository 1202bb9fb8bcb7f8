//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces implemented by the external collaborators of the
//! fusion engine:
//! - InferenceAgent: proposes state deltas each iteration
//! - ResegmentationHandler: re-derives entities from original source data
//! - AuditStore: persists the audit chain

pub mod audit_store;
pub mod inference_agent;
pub mod resegmentation;

pub use audit_store::AuditStore;
pub use inference_agent::{InferenceAgent, ProposalRequest};
pub use resegmentation::ResegmentationHandler;
