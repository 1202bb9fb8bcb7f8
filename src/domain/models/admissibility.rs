//! Outcome of validating a transition against the constraint lattice.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::lattice::NodeId;

/// Why a transition is inadmissible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectionReason {
    UnknownNode { node: NodeId },
    InvalidConfidence { node: NodeId, confidence: f64 },
    /// A node set true while one of its predecessors does not hold.
    MissingPredecessor { node: NodeId, predecessor: NodeId },
    /// A true node left outside the transition loses a predecessor.
    OrphanedDependent { node: NodeId, predecessor: NodeId },
    /// Two mutually exclusive nodes would both hold.
    MutualExclusion { first: NodeId, second: NodeId },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode { node } => write!(f, "unknown node {node}"),
            Self::InvalidConfidence { node, confidence } => {
                write!(f, "confidence {confidence} for {node} outside [0, 1]")
            }
            Self::MissingPredecessor { node, predecessor } => {
                write!(f, "{node} asserted while predecessor {predecessor} does not hold")
            }
            Self::OrphanedDependent { node, predecessor } => {
                write!(f, "{node} still holds but predecessor {predecessor} would not")
            }
            Self::MutualExclusion { first, second } => {
                write!(f, "{first} and {second} are mutually exclusive")
            }
        }
    }
}

/// Result of `ConstraintLattice::validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Admissibility {
    Admissible,
    Rejected { reason: RejectionReason },
}

impl Admissibility {
    pub const fn is_admissible(&self) -> bool {
        matches!(self, Self::Admissible)
    }
}
