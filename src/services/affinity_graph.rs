//! Affinity graph construction.
//!
//! Every pair of entities from different modalities is scored
//! independently, so pair scoring runs on the rayon pool; results are only
//! merged (and sorted) when the graph is assembled.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::errors::{FusionError, FusionResult};
use crate::domain::models::{
    AffinityConfig, AffinityEdge, AffinityGraph, DiagnosticEntity, EdgeKind, RejectedEntity,
};

/// Below this many entities pairs are scored on the calling thread.
const MIN_PARALLEL_ENTITIES: usize = 32;

/// Builds [`AffinityGraph`]s. Pure with respect to the registry.
#[derive(Debug, Clone)]
pub struct AffinityGraphBuilder {
    config: AffinityConfig,
}

impl AffinityGraphBuilder {
    pub const fn new(config: AffinityConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &AffinityConfig {
        &self.config
    }

    /// Build a graph, failing on the first entity that cannot be compared.
    pub fn build(&self, entities: Vec<DiagnosticEntity>) -> FusionResult<AffinityGraph> {
        let reference_dim = self.reference_dim(&entities);
        for entity in &entities {
            self.check_comparable(entity, reference_dim)?;
        }
        Ok(self.assemble(entities))
    }

    /// Build a graph from the comparable entities, returning the rest as
    /// rejections.
    pub fn build_lenient(
        &self,
        entities: Vec<DiagnosticEntity>,
    ) -> (AffinityGraph, Vec<RejectedEntity>) {
        let reference_dim = self.reference_dim(&entities);
        let mut rejected = Vec::new();
        let kept: Vec<DiagnosticEntity> = entities
            .into_iter()
            .filter(|entity| match self.check_comparable(entity, reference_dim) {
                Ok(()) => true,
                Err(err) => {
                    warn!(entity_id = %entity.id().short(), error = %err, "Entity left out of affinity graph");
                    rejected.push(RejectedEntity {
                        entity_id: Some(entity.id().clone()),
                        reason: err.to_string(),
                    });
                    false
                }
            })
            .collect();
        (self.assemble(kept), rejected)
    }

    /// Score one pair. Returns every edge the pair qualifies for.
    pub fn score_pair(&self, a: &DiagnosticEntity, b: &DiagnosticEntity) -> Vec<AffinityEdge> {
        let mut edges = Vec::new();
        if a.modality() == b.modality() {
            return edges;
        }
        let (low, high) = if a.id() <= b.id() { (a, b) } else { (b, a) };

        if let (Some(x), Some(y)) = (low.embedding(), high.embedding()) {
            if let Some(similarity) = cosine_similarity(x, y) {
                if similarity > self.config.semantic_threshold {
                    edges.push(undirected(low, high, EdgeKind::SemanticMatch, similarity));
                }
            }
        }

        if let (Some(x), Some(y)) = (low.payload().geometry(), high.payload().geometry()) {
            let weight = (-x.distance_to(y) / self.config.spatial_scale_mm).exp();
            if weight > self.config.spatial_threshold {
                edges.push(undirected(low, high, EdgeKind::SpatialAdjacency, weight));
            }
        }

        if let (Some(ta), Some(tb)) = (a.observed_at(), b.observed_at()) {
            if a.payload().has_label(b.label()) && ta != tb {
                let (earlier, later) = if ta < tb { (a, b) } else { (b, a) };
                #[allow(clippy::cast_precision_loss)]
                let hours = (ta - tb).num_seconds().unsigned_abs() as f64 / 3600.0;
                let weight = (-hours / self.config.temporal_horizon_hours).exp();
                if weight > self.config.temporal_threshold {
                    edges.push(AffinityEdge {
                        source: earlier.id().clone(),
                        target: later.id().clone(),
                        kind: EdgeKind::TemporalSuccessor,
                        weight,
                    });
                }
            }
        }

        edges
    }

    fn assemble(&self, mut entities: Vec<DiagnosticEntity>) -> AffinityGraph {
        entities.sort_by(|a, b| a.id().cmp(b.id()));
        entities.dedup_by(|a, b| a.id() == b.id());

        let n = entities.len();
        let score_row = |i: usize| -> Vec<AffinityEdge> {
            entities[i + 1..]
                .iter()
                .flat_map(|other| self.score_pair(&entities[i], other))
                .collect()
        };
        let edges: Vec<AffinityEdge> = if n < MIN_PARALLEL_ENTITIES {
            (0..n).flat_map(score_row).collect()
        } else {
            (0..n).into_par_iter().flat_map_iter(score_row).collect()
        };

        debug!(entities = n, edges = edges.len(), "Built affinity graph");
        AffinityGraph::from_parts(entities, edges)
    }

    /// Embedding width every embedded entity must share: the configured one,
    /// else the width of the first embedding in id order.
    fn reference_dim(&self, entities: &[DiagnosticEntity]) -> Option<usize> {
        self.config.embedding_dim.or_else(|| {
            entities
                .iter()
                .filter(|e| e.embedding().is_some())
                .min_by(|a, b| a.id().cmp(b.id()))
                .and_then(DiagnosticEntity::embedding)
                .map(<[f32]>::len)
        })
    }

    fn check_comparable(
        &self,
        entity: &DiagnosticEntity,
        reference_dim: Option<usize>,
    ) -> FusionResult<()> {
        entity.validate(self.config.embedding_dim)?;
        let Some(embedding) = entity.embedding() else {
            if entity.payload().geometry().is_some() || entity.observed_at().is_some() {
                return Ok(());
            }
            return Err(FusionError::malformed(
                Some(entity.id()),
                "no embedding, geometry or observation time to compare on",
            ));
        };
        if let Some(dim) = reference_dim {
            if embedding.len() != dim {
                return Err(FusionError::malformed(
                    Some(entity.id()),
                    format!("embedding dimension {} != {dim}", embedding.len()),
                ));
            }
        }
        Ok(())
    }
}

fn undirected(
    low: &DiagnosticEntity,
    high: &DiagnosticEntity,
    kind: EdgeKind,
    weight: f64,
) -> AffinityEdge {
    AffinityEdge {
        source: low.id().clone(),
        target: high.id().clone(),
        kind,
        weight,
    }
}

/// `cos(θ) = (a·b) / (‖a‖‖b‖)`. `None` for mismatched widths or zero norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        None
    } else {
        Some((dot / denominator).clamp(-1.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::models::{
        EntityPayload, EntitySubmission, Geometry, Modality, Severity, TextSpan,
    };

    fn builder() -> AffinityGraphBuilder {
        AffinityGraphBuilder::new(AffinityConfig::default())
    }

    fn imaging(label: &str, centroid: [f64; 3], embedding: Vec<f32>) -> DiagnosticEntity {
        EntitySubmission::new(
            Modality::Imaging,
            EntityPayload::Finding {
                label: label.to_string(),
                severity: Severity::Medium,
                region: Some(Geometry::at(centroid)),
            },
            0.8,
        )
        .with_embedding(embedding)
        .seal()
    }

    fn segmentation(label: &str, centroid: [f64; 3], embedding: Vec<f32>) -> DiagnosticEntity {
        EntitySubmission::new(
            Modality::Segmentation,
            EntityPayload::Measurement {
                label: label.to_string(),
                geometry: Geometry::at(centroid),
                volume_mm3: Some(1000.0),
            },
            0.9,
        )
        .with_embedding(embedding)
        .seal()
    }

    fn text(label: &str, embedding: Vec<f32>) -> DiagnosticEntity {
        EntitySubmission::new(
            Modality::ClinicalText,
            EntityPayload::TextEntity {
                label: label.to_string(),
                span: TextSpan {
                    start: 0,
                    end: label.len(),
                    text: label.to_string(),
                },
            },
            0.7,
        )
        .with_embedding(embedding)
        .seal()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-12);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_semantic_and_spatial_edges_across_modalities() {
        let a = imaging("cyst", [0.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]);
        let b = segmentation("cyst", [5.0, 0.0, 0.0], vec![0.95, 0.05, 0.0]);
        let graph = builder().build(vec![a.clone(), b.clone()]).unwrap();

        let kinds: Vec<EdgeKind> = graph.edges().iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EdgeKind::SemanticMatch));
        assert!(kinds.contains(&EdgeKind::SpatialAdjacency));
        for edge in graph.edges() {
            assert!(edge.source < edge.target);
        }
    }

    #[test]
    fn test_same_modality_never_linked() {
        let a = imaging("cyst", [0.0, 0.0, 0.0], vec![1.0, 0.0]);
        let b = imaging("cyst ", [0.0, 0.0, 0.0], vec![1.0, 0.0]);
        let graph = builder().build(vec![a, b]).unwrap();
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_below_threshold_not_materialized() {
        let a = text("mass", vec![1.0, 0.0]);
        let b = imaging("mass", [0.0, 0.0, 0.0], vec![0.0, 1.0]);
        let graph = builder().build(vec![a, b]).unwrap();
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_temporal_successor_is_directed() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let prior = EntitySubmission::new(
            Modality::Imaging,
            EntityPayload::Finding {
                label: "effusion".to_string(),
                severity: Severity::Low,
                region: None,
            },
            0.6,
        )
        .with_embedding(vec![1.0, 0.0])
        .observed_at(earlier)
        .seal();
        let follow_up = EntitySubmission::new(
            Modality::ClinicalText,
            EntityPayload::TextEntity {
                label: "Effusion".to_string(),
                span: TextSpan {
                    start: 3,
                    end: 11,
                    text: "effusion".to_string(),
                },
            },
            0.7,
        )
        .with_embedding(vec![0.0, 1.0])
        .observed_at(later)
        .seal();

        let graph = builder().build(vec![follow_up.clone(), prior.clone()]).unwrap();
        let temporal: Vec<&AffinityEdge> = graph
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::TemporalSuccessor)
            .collect();
        assert_eq!(temporal.len(), 1);
        assert_eq!(&temporal[0].source, prior.id());
        assert_eq!(&temporal[0].target, follow_up.id());
        assert!((temporal[0].weight - (-24.0_f64 / 72.0).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_missing_embedding_is_malformed() {
        let bare = EntitySubmission::new(
            Modality::Imaging,
            EntityPayload::Finding {
                label: "nodule".to_string(),
                severity: Severity::Low,
                region: None,
            },
            0.5,
        )
        .seal();
        let ok = text("nodule", vec![1.0, 0.0]);

        let err = builder().build(vec![bare.clone(), ok.clone()]).unwrap_err();
        assert!(matches!(err, FusionError::MalformedEntity { .. }));

        let (graph, rejected) = builder().build_lenient(vec![bare, ok]);
        assert_eq!(graph.len(), 1);
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_measurement_without_embedding_links_spatially() {
        let mask = EntitySubmission::new(
            Modality::Segmentation,
            EntityPayload::Measurement {
                label: "lesion".to_string(),
                geometry: Geometry::at([1.0, 0.0, 0.0]),
                volume_mm3: Some(800.0),
            },
            0.9,
        )
        .seal();
        let finding = imaging("lesion", [0.0, 0.0, 0.0], vec![1.0, 0.0]);

        let graph = builder().build(vec![mask.clone(), finding]).unwrap();
        assert_eq!(graph.len(), 2);
        let kinds: Vec<EdgeKind> = graph.edges().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EdgeKind::SpatialAdjacency]);

        let (graph, rejected) = builder().build_lenient(vec![mask]);
        assert_eq!(graph.len(), 1);
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_build_is_order_independent() {
        let entities: Vec<DiagnosticEntity> = (0..40)
            .map(|i| {
                let x = f64::from(i);
                #[allow(clippy::cast_possible_truncation)]
                let e = vec![1.0, (x / 40.0) as f32];
                if i % 2 == 0 {
                    imaging(&format!("finding-{i}"), [x, 0.0, 0.0], e)
                } else {
                    segmentation(&format!("roi-{i}"), [x, 1.0, 0.0], e)
                }
            })
            .collect();
        let mut reversed = entities.clone();
        reversed.reverse();

        let a = builder().build(entities).unwrap();
        let b = builder().build(reversed).unwrap();
        assert_eq!(a.edges(), b.edges());
        assert!(a.edge_count() > 0);
    }
}
