//! Domain errors for the diagnostic fusion engine.

use thiserror::Error;

use super::models::{AgentId, EntityId, NodeId, RejectionReason};

/// Errors raised while fusing diagnostic signals into a symbolic state.
///
/// Entity- and transition-level variants are recovered inside the
/// convergence loop; harmonization and audit-chain variants surface to the
/// caller. See [`FusionError::is_fatal`].
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("Malformed entity {}: {reason}", entity_label(.entity_id))]
    MalformedEntity {
        entity_id: Option<EntityId>,
        reason: String,
    },

    #[error("Transition rejected by constraint lattice: {0}")]
    ConstraintRejected(RejectionReason),

    #[error("No admissible agent candidates for iteration {iteration}")]
    NoCandidates { iteration: u64 },

    #[error("Convergence not reached after {iterations} iterations")]
    ConvergenceTimeout { iterations: u64 },

    #[error("Audit chain corrupted at entry {index}: {reason}")]
    AuditChainCorrupted { index: u64, reason: String },

    #[error("Invalid constraint lattice: {0}")]
    InvalidLattice(String),

    #[error("Unknown constraint node: {0}")]
    UnknownNode(NodeId),

    #[error("Agent {agent_id} failed: {reason}")]
    AgentFailed { agent_id: AgentId, reason: String },

    #[error("Agent {agent_id} timed out after {timeout_ms}ms")]
    AgentTimeout { agent_id: AgentId, timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn entity_label(id: &Option<EntityId>) -> String {
    id.as_ref()
        .map_or_else(|| "<unidentified>".to_string(), ToString::to_string)
}

impl FusionError {
    /// Build a `MalformedEntity` error.
    pub fn malformed(entity_id: Option<&EntityId>, reason: impl Into<String>) -> Self {
        Self::MalformedEntity {
            entity_id: entity_id.cloned(),
            reason: reason.into(),
        }
    }

    /// Whether the error must stop the run rather than be recovered in the loop.
    ///
    /// `NoCandidates` only becomes fatal once the resegmentation retry budget
    /// is spent, so the controller decides that case itself; here it counts
    /// as fatal because reaching the caller means the budget is gone.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::MalformedEntity { .. }
            | Self::ConstraintRejected(_)
            | Self::AgentFailed { .. }
            | Self::AgentTimeout { .. } => false,
            Self::NoCandidates { .. }
            | Self::ConvergenceTimeout { .. }
            | Self::AuditChainCorrupted { .. }
            | Self::InvalidLattice(_)
            | Self::UnknownNode(_)
            | Self::Configuration(_)
            | Self::Persistence(_)
            | Self::Serialization(_) => true,
        }
    }
}

pub type FusionResult<T> = Result<T, FusionError>;

impl From<serde_json::Error> for FusionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FusionError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!FusionError::malformed(None, "no label").is_fatal());
        assert!(!FusionError::AgentTimeout {
            agent_id: AgentId::from("radiology"),
            timeout_ms: 10,
        }
        .is_fatal());
        assert!(FusionError::NoCandidates { iteration: 3 }.is_fatal());
        assert!(FusionError::AuditChainCorrupted {
            index: 2,
            reason: "parent hash mismatch".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_malformed_display_without_id() {
        let err = FusionError::malformed(None, "confidence out of range");
        assert_eq!(
            err.to_string(),
            "Malformed entity <unidentified>: confidence out of range"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let err: FusionError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, FusionError::Serialization(_)));
    }
}
