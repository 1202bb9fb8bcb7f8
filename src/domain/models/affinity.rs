//! Affinity graph linking entities across modalities.
//!
//! The graph is an arena: entities live in a vector sorted by id, edges in a
//! vector sorted by `(source, target, kind)`, and adjacency is kept as edge
//! indices per entity slot. Graphs are rebuilt, never edited.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::entity::{DiagnosticEntity, EntityId, Modality};

/// Relation carried by an affinity edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    SpatialAdjacency,
    SemanticMatch,
    TemporalSuccessor,
}

impl EdgeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SpatialAdjacency => "spatial_adjacency",
            Self::SemanticMatch => "semantic_match",
            Self::TemporalSuccessor => "temporal_successor",
        }
    }

    /// Directed edges run from `source` to `target`; the rest are symmetric.
    pub const fn is_directed(&self) -> bool {
        matches!(self, Self::TemporalSuccessor)
    }
}

/// Weighted relation between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityEdge {
    pub source: EntityId,
    pub target: EntityId,
    pub kind: EdgeKind,
    pub weight: f64,
}

impl AffinityEdge {
    /// Whether the edge touches `id` on either end.
    pub fn touches(&self, id: &EntityId) -> bool {
        &self.source == id || &self.target == id
    }

    /// The endpoint opposite to `id`, if the edge touches it.
    pub fn other(&self, id: &EntityId) -> Option<&EntityId> {
        if &self.source == id {
            Some(&self.target)
        } else if &self.target == id {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// Similarity-weighted graph over the active entities of a run.
#[derive(Debug, Clone, Default)]
pub struct AffinityGraph {
    entities: Vec<DiagnosticEntity>,
    index: HashMap<EntityId, usize>,
    edges: Vec<AffinityEdge>,
    adjacency: Vec<Vec<usize>>,
}

impl AffinityGraph {
    /// Assemble a graph. Entities and edges are sorted so that identical
    /// inputs always produce identical graphs regardless of arrival order.
    pub fn from_parts(mut entities: Vec<DiagnosticEntity>, mut edges: Vec<AffinityEdge>) -> Self {
        entities.sort_by(|a, b| a.id().cmp(b.id()));
        entities.dedup_by(|a, b| a.id() == b.id());
        edges.sort_by(|a, b| {
            (&a.source, &a.target, a.kind).cmp(&(&b.source, &b.target, b.kind))
        });

        let index: HashMap<EntityId, usize> = entities
            .iter()
            .enumerate()
            .map(|(slot, entity)| (entity.id().clone(), slot))
            .collect();

        let mut adjacency = vec![Vec::new(); entities.len()];
        edges.retain(|edge| index.contains_key(&edge.source) && index.contains_key(&edge.target));
        for (edge_idx, edge) in edges.iter().enumerate() {
            adjacency[index[&edge.source]].push(edge_idx);
            if edge.source != edge.target {
                adjacency[index[&edge.target]].push(edge_idx);
            }
        }

        Self {
            entities,
            index,
            edges,
            adjacency,
        }
    }

    pub fn entities(&self) -> &[DiagnosticEntity] {
        &self.entities
    }

    pub fn entity(&self, id: &EntityId) -> Option<&DiagnosticEntity> {
        self.index.get(id).map(|slot| &self.entities[*slot])
    }

    pub fn edges(&self) -> &[AffinityEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges incident to an entity, in graph order.
    pub fn edges_of<'a>(&'a self, id: &EntityId) -> impl Iterator<Item = &'a AffinityEdge> + 'a {
        self.index
            .get(id)
            .map(|slot| self.adjacency[*slot].as_slice())
            .unwrap_or_default()
            .iter()
            .map(|edge_idx| &self.edges[*edge_idx])
    }

    /// Entities with the given label (case-insensitive), optionally restricted
    /// to one modality.
    pub fn with_label<'a>(
        &'a self,
        label: &'a str,
        modality: Option<Modality>,
    ) -> impl Iterator<Item = &'a DiagnosticEntity> + 'a {
        self.entities.iter().filter(move |entity| {
            entity.payload().has_label(label) && modality.is_none_or(|m| entity.modality() == m)
        })
    }

    /// Strongest edge weight between any entity in `left` and any in `right`.
    pub fn strongest_link(&self, left: &[&EntityId], right: &[&EntityId]) -> Option<f64> {
        left.iter()
            .flat_map(|l| {
                self.edges_of(l).filter_map(move |edge| {
                    edge.other(l)
                        .filter(|other| right.contains(other))
                        .map(|_| edge.weight)
                })
            })
            .max_by(f64::total_cmp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::entity::{EntityPayload, EntitySubmission, Geometry, Severity};

    fn finding(label: &str, modality: Modality) -> DiagnosticEntity {
        EntitySubmission::new(
            modality,
            EntityPayload::Finding {
                label: label.to_string(),
                severity: Severity::Medium,
                region: Some(Geometry::at([0.0, 0.0, 0.0])),
            },
            0.8,
        )
        .seal()
    }

    #[test]
    fn test_adjacency_and_links() {
        let a = finding("cyst", Modality::Imaging);
        let b = finding("cyst", Modality::Segmentation);
        let c = finding("mass", Modality::Segmentation);
        let edges = vec![
            AffinityEdge {
                source: a.id().clone(),
                target: b.id().clone(),
                kind: EdgeKind::SemanticMatch,
                weight: 0.91,
            },
            AffinityEdge {
                source: a.id().clone(),
                target: b.id().clone(),
                kind: EdgeKind::SpatialAdjacency,
                weight: 0.6,
            },
        ];
        let graph = AffinityGraph::from_parts(vec![c.clone(), b.clone(), a.clone()], edges);

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edges_of(a.id()).count(), 2);
        assert_eq!(graph.edges_of(c.id()).count(), 0);
        assert_eq!(graph.with_label("CYST", None).count(), 2);
        assert_eq!(graph.with_label("cyst", Some(Modality::Imaging)).count(), 1);

        let link = graph.strongest_link(&[a.id()], &[b.id()]);
        assert_eq!(link, Some(0.91));
        assert_eq!(graph.strongest_link(&[a.id()], &[c.id()]), None);
    }

    #[test]
    fn test_dangling_edges_are_dropped() {
        let a = finding("cyst", Modality::Imaging);
        let edges = vec![AffinityEdge {
            source: a.id().clone(),
            target: EntityId::from("missing"),
            kind: EdgeKind::SemanticMatch,
            weight: 0.9,
        }];
        let graph = AffinityGraph::from_parts(vec![a], edges);
        assert_eq!(graph.edge_count(), 0);
    }
}
