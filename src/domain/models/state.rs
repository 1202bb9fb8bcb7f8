//! Symbolic state vector and transitions over constraint nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::lattice::{ConstraintLattice, NodeId};
use crate::domain::errors::FusionResult;

/// Truth status of a constraint node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truth {
    Unknown,
    True,
    False,
}

impl Truth {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::True => "true",
            Self::False => "false",
        }
    }
}

/// Truth value plus confidence in that truth value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeValue {
    pub truth: Truth,
    pub confidence: f64,
}

impl NodeValue {
    pub const UNKNOWN: Self = Self {
        truth: Truth::Unknown,
        confidence: 0.0,
    };

    pub const fn asserted(confidence: f64) -> Self {
        Self {
            truth: Truth::True,
            confidence,
        }
    }

    pub const fn refuted(confidence: f64) -> Self {
        Self {
            truth: Truth::False,
            confidence,
        }
    }

    /// The predicate holds.
    pub fn holds(&self) -> bool {
        self.truth == Truth::True
    }

    pub fn is_active(&self) -> bool {
        self.truth != Truth::Unknown
    }

    /// `+c` for true, `-c` for false, `0` for unknown.
    pub fn signed(&self) -> f64 {
        match self.truth {
            Truth::True => self.confidence,
            Truth::False => -self.confidence,
            Truth::Unknown => 0.0,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// A set of `(node, new value)` pairs proposed for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transition {
    changes: BTreeMap<NodeId, NodeValue>,
}

impl Transition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, node: impl Into<NodeId>, value: NodeValue) -> Self {
        self.changes.insert(node.into(), value);
        self
    }

    pub fn insert(&mut self, node: NodeId, value: NodeValue) {
        self.changes.insert(node, value);
    }

    pub fn get(&self, node: &NodeId) -> Option<&NodeValue> {
        self.changes.get(node)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.changes.contains_key(node)
    }

    /// Changes in node-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &NodeValue)> {
        self.changes.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.changes.keys()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl FromIterator<(NodeId, NodeValue)> for Transition {
    fn from_iter<T: IntoIterator<Item = (NodeId, NodeValue)>>(iter: T) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

/// The evolving symbolic state of one run.
///
/// There are no in-place mutators: the next state is produced with
/// [`StateVector::with_transition`], which keeps the committed history
/// totally ordered by `iteration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    iteration: u64,
    values: BTreeMap<NodeId, NodeValue>,
}

impl StateVector {
    /// Every lattice node unknown, iteration 0.
    pub fn initial(lattice: &ConstraintLattice) -> Self {
        Self {
            iteration: 0,
            values: lattice
                .nodes()
                .map(|node| (node.id.clone(), NodeValue::UNKNOWN))
                .collect(),
        }
    }

    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Value of a node; `None` if the node is not part of this state.
    pub fn get(&self, node: &NodeId) -> Option<NodeValue> {
        self.values.get(node).copied()
    }

    /// Value after applying `transition` on top of this state.
    pub fn overlay(&self, transition: &Transition, node: &NodeId) -> NodeValue {
        transition
            .get(node)
            .copied()
            .or_else(|| self.get(node))
            .unwrap_or(NodeValue::UNKNOWN)
    }

    pub fn values(&self) -> impl Iterator<Item = (&NodeId, &NodeValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of nodes whose truth is not unknown.
    pub fn active_count(&self) -> usize {
        self.values.values().filter(|v| v.is_active()).count()
    }

    /// Next state: the transition applied and the iteration counter advanced.
    #[must_use]
    pub fn with_transition(&self, transition: &Transition) -> Self {
        let mut values = self.values.clone();
        for (node, value) in transition.iter() {
            values.insert(node.clone(), *value);
        }
        Self {
            iteration: self.iteration + 1,
            values,
        }
    }

    /// L2 norm of the signed-value difference over the union of nodes.
    pub fn distance(&self, other: &Self) -> f64 {
        let mut sum = 0.0;
        for (node, value) in &self.values {
            let theirs = other.get(node).unwrap_or(NodeValue::UNKNOWN);
            sum += (value.signed() - theirs.signed()).powi(2);
        }
        for (node, value) in &other.values {
            if !self.values.contains_key(node) {
                sum += value.signed().powi(2);
            }
        }
        sum.sqrt()
    }

    /// Both states assert the same truth on every node. Only then is an
    /// entropy difference a measure of stability.
    pub fn same_truths(&self, other: &Self) -> bool {
        let truth = |state: &Self, node: &NodeId| {
            state.get(node).map_or(Truth::Unknown, |v| v.truth)
        };
        self.values
            .keys()
            .chain(other.values.keys())
            .all(|node| truth(self, node) == truth(other, node))
    }

    /// Mean binary entropy (bits) of the confidences of active nodes.
    pub fn entropy(&self) -> f64 {
        let active: Vec<f64> = self
            .values
            .values()
            .filter(|v| v.is_active())
            .map(|v| binary_entropy(v.confidence))
            .collect();
        if active.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let count = active.len() as f64;
            active.iter().sum::<f64>() / count
        }
    }

    /// Canonical byte form used for hashing.
    pub fn canonical_bytes(&self) -> FusionResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Seal the state at run termination.
    pub fn freeze(self) -> FrozenStateVector {
        FrozenStateVector(self)
    }
}

fn binary_entropy(p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    (-p).mul_add(p.log2(), -(1.0 - p) * (1.0 - p).log2())
}

/// Final state of a terminated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrozenStateVector(StateVector);

impl FrozenStateVector {
    pub const fn state(&self) -> &StateVector {
        &self.0
    }

    pub fn into_inner(self) -> StateVector {
        self.0
    }
}

impl std::ops::Deref for FrozenStateVector {
    type Target = StateVector;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
