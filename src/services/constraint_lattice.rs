//! Transition validation against the constraint lattice.
//!
//! `validate` is a pure function of `(lattice, current, proposed)`: no
//! interior state, no I/O. It is safe to call from several workers at once
//! when candidate transitions are evaluated speculatively.

use std::collections::BTreeSet;

use crate::domain::errors::{FusionError, FusionResult};
use crate::domain::models::{
    Admissibility, ConstraintLattice, NodeId, RejectionReason, StateVector, Transition,
};

impl ConstraintLattice {
    /// Decide whether `proposed` may be applied on top of `current`.
    ///
    /// Checks run in this order, nodes in id order within each check:
    /// unknown nodes, confidence ranges, missing predecessors, orphaned
    /// dependents, mutual exclusion. The first violation is reported.
    pub fn validate(&self, current: &StateVector, proposed: &Transition) -> Admissibility {
        match self.violations(current, proposed).into_iter().next() {
            Some(reason) => Admissibility::Rejected { reason },
            None => Admissibility::Admissible,
        }
    }

    /// Like [`validate`](Self::validate), as a `Result`.
    pub fn ensure_admissible(
        &self,
        current: &StateVector,
        proposed: &Transition,
    ) -> FusionResult<()> {
        match self.validate(current, proposed) {
            Admissibility::Admissible => Ok(()),
            Admissibility::Rejected { reason } => Err(FusionError::ConstraintRejected(reason)),
        }
    }

    /// Every violation `proposed` would introduce, in check order.
    pub fn violations(&self, current: &StateVector, proposed: &Transition) -> Vec<RejectionReason> {
        let mut found = Vec::new();

        for (node, value) in proposed.iter() {
            if !self.contains(node) {
                found.push(RejectionReason::UnknownNode { node: node.clone() });
            } else if !value.is_well_formed() {
                found.push(RejectionReason::InvalidConfidence {
                    node: node.clone(),
                    confidence: value.confidence,
                });
            }
        }
        if !found.is_empty() {
            return found;
        }

        for (node, _) in proposed.iter().filter(|(_, v)| v.holds()) {
            for predecessor in self.predecessors(node) {
                if !current.overlay(proposed, predecessor).holds() {
                    found.push(RejectionReason::MissingPredecessor {
                        node: node.clone(),
                        predecessor: predecessor.clone(),
                    });
                }
            }
        }

        for (node, _) in proposed.iter().filter(|(_, v)| !v.holds()) {
            for dependent in self.dependents(node) {
                if !proposed.contains(dependent)
                    && current.get(dependent).is_some_and(|v| v.holds())
                {
                    found.push(RejectionReason::OrphanedDependent {
                        node: dependent.clone(),
                        predecessor: node.clone(),
                    });
                }
            }
        }

        let mut pairs: BTreeSet<(&NodeId, &NodeId)> = BTreeSet::new();
        for (node, _) in proposed.iter().filter(|(_, v)| v.holds()) {
            for other in self.exclusions(node) {
                if current.overlay(proposed, other).holds() {
                    pairs.insert(if node < other { (node, other) } else { (other, node) });
                }
            }
        }
        found.extend(pairs.into_iter().map(|(first, second)| {
            RejectionReason::MutualExclusion {
                first: first.clone(),
                second: second.clone(),
            }
        }));

        found
    }

    /// Whether every asserted node in `state` has all predecessors asserted
    /// and no two exclusive nodes are both asserted.
    pub fn is_consistent(&self, state: &StateVector) -> bool {
        state.values().filter(|(_, v)| v.holds()).all(|(node, _)| {
            self.predecessors(node)
                .iter()
                .all(|p| state.get(p).is_some_and(|v| v.holds()))
                && self
                    .exclusions(node)
                    .all(|e| !state.get(e).is_some_and(|v| v.holds()))
        })
    }
}
