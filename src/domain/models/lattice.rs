//! Constraint lattice definition.
//!
//! A lattice is a set of diagnostic predicates ([`ConstraintNode`]) with a
//! dependency order `≼` (`requires`) and a symmetric mutual-exclusion
//! relation (`excludes`). It is loaded once per session and never mutated;
//! transition validation lives in `services::constraint_lattice`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::entity::{EntityKind, Modality};
use crate::domain::errors::{FusionError, FusionResult};

/// Constraint node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Evidence rule attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// An entity with this label exists.
    EntityPresent {
        label: String,
        #[serde(default)]
        kind: Option<EntityKind>,
        #[serde(default)]
        min_confidence: f64,
    },
    /// A segmented structure with this label exceeds a volume.
    MeasurementAbove { label: String, threshold_mm3: f64 },
    /// The label is found in every listed modality and the findings are
    /// linked in the affinity graph.
    Corroborated {
        label: String,
        modalities: Vec<Modality>,
    },
    /// Holds purely through its predecessors.
    Derived,
}

/// A diagnostic predicate in the lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintNode {
    pub id: NodeId,
    #[serde(default)]
    pub description: String,
    pub predicate: Predicate,
    /// Direct `≼`-predecessors; this node cannot hold unless they hold.
    #[serde(default)]
    pub requires: Vec<NodeId>,
    /// Nodes that may never hold together with this one.
    #[serde(default)]
    pub excludes: Vec<NodeId>,
}

impl ConstraintNode {
    pub fn new(id: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            id: NodeId::new(id),
            description: String::new(),
            predicate,
            requires: Vec::new(),
            excludes: Vec::new(),
        }
    }

    #[must_use]
    pub fn requires<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(ids.into_iter().map(NodeId::new));
        self
    }

    #[must_use]
    pub fn excludes<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(ids.into_iter().map(NodeId::new));
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Serialized form of a lattice, as written in lattice files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatticeDefinition {
    pub nodes: Vec<ConstraintNode>,
}

/// Validated, read-only constraint lattice.
#[derive(Debug, Clone)]
pub struct ConstraintLattice {
    nodes: BTreeMap<NodeId, ConstraintNode>,
    order: Vec<NodeId>,
    dependents: BTreeMap<NodeId, BTreeSet<NodeId>>,
    exclusions: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl ConstraintLattice {
    /// Validate a definition and build the lattice.
    pub fn new(definition: LatticeDefinition) -> FusionResult<Self> {
        let mut nodes = BTreeMap::new();
        for node in definition.nodes {
            if node.id.as_str().trim().is_empty() {
                return Err(FusionError::InvalidLattice("node with empty id".to_string()));
            }
            if let Predicate::Corroborated { modalities, .. } = &node.predicate {
                let distinct: BTreeSet<_> = modalities.iter().collect();
                if distinct.len() < 2 {
                    return Err(FusionError::InvalidLattice(format!(
                        "node {} corroborates fewer than two modalities",
                        node.id
                    )));
                }
            }
            if let Some(previous) = nodes.insert(node.id.clone(), node) {
                return Err(FusionError::InvalidLattice(format!(
                    "duplicate node id {}",
                    previous.id
                )));
            }
        }

        let mut dependents: BTreeMap<NodeId, BTreeSet<NodeId>> =
            nodes.keys().map(|id| (id.clone(), BTreeSet::new())).collect();
        let mut exclusions = dependents.clone();

        for node in nodes.values() {
            for pred in &node.requires {
                check_reference(&nodes, &node.id, pred, "requires")?;
                if let Some(set) = dependents.get_mut(pred) {
                    set.insert(node.id.clone());
                }
            }
            for other in &node.excludes {
                check_reference(&nodes, &node.id, other, "excludes")?;
                if let Some(set) = exclusions.get_mut(&node.id) {
                    set.insert(other.clone());
                }
                if let Some(set) = exclusions.get_mut(other) {
                    set.insert(node.id.clone());
                }
            }
        }

        let order = topological_order(&nodes)?;

        let lattice = Self {
            nodes,
            order,
            dependents,
            exclusions,
        };

        for id in lattice.nodes.keys() {
            let ancestors = lattice.ancestors(id);
            if let Some(conflict) = lattice.exclusions[id].intersection(&ancestors).next() {
                return Err(FusionError::InvalidLattice(format!(
                    "node {id} excludes its own predecessor {conflict}"
                )));
            }
        }

        Ok(lattice)
    }

    pub fn node(&self, id: &NodeId) -> Option<&ConstraintNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ConstraintNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids such that every predecessor precedes its dependents; ties
    /// broken by id.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn predecessors(&self, id: &NodeId) -> &[NodeId] {
        match self.nodes.get(id) {
            Some(node) => &node.requires,
            None => &[],
        }
    }

    pub fn dependents(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.dependents.get(id).into_iter().flatten()
    }

    pub fn exclusions(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.exclusions.get(id).into_iter().flatten()
    }

    pub fn are_exclusive(&self, a: &NodeId, b: &NodeId) -> bool {
        self.exclusions.get(a).is_some_and(|set| set.contains(b))
    }

    /// Transitive `≼`-predecessors of a node.
    pub fn ancestors(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&NodeId> = self.predecessors(id).iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.predecessors(next));
            }
        }
        seen
    }
}

fn check_reference(
    nodes: &BTreeMap<NodeId, ConstraintNode>,
    from: &NodeId,
    to: &NodeId,
    relation: &str,
) -> FusionResult<()> {
    if from == to {
        return Err(FusionError::InvalidLattice(format!(
            "node {from} {relation} itself"
        )));
    }
    if !nodes.contains_key(to) {
        return Err(FusionError::InvalidLattice(format!(
            "node {from} {relation} unknown node {to}"
        )));
    }
    Ok(())
}

/// Kahn's algorithm with an ordered ready set for a deterministic order.
fn topological_order(nodes: &BTreeMap<NodeId, ConstraintNode>) -> FusionResult<Vec<NodeId>> {
    let mut remaining: BTreeMap<&NodeId, usize> = nodes
        .values()
        .map(|node| {
            let distinct: BTreeSet<_> = node.requires.iter().collect();
            (&node.id, distinct.len())
        })
        .collect();
    let mut ready: BTreeSet<&NodeId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(id) = ready.pop_first() {
        remaining.remove(id);
        order.push(id.clone());
        for node in nodes.values() {
            if node.requires.contains(id) {
                if let Some(count) = remaining.get_mut(&node.id) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(&node.id);
                    }
                }
            }
        }
    }

    if remaining.is_empty() {
        Ok(order)
    } else {
        let cycle: Vec<&str> = remaining.keys().map(|id| id.as_str()).collect();
        Err(FusionError::InvalidLattice(format!(
            "dependency cycle among: {}",
            cycle.join(", ")
        )))
    }
}
