//! Diagnostic entity registry.
//!
//! Canonical, append-only store of the entities of one run, keyed by their
//! content-derived id. Revisions never overwrite: a revision is a new entity
//! whose `supersedes` marks the older one inactive.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::errors::{FusionError, FusionResult};
use crate::domain::models::{
    digest_hex, DiagnosticEntity, EntityId, EntitySubmission, RejectedEntity,
};

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Newly stored entities, in submission order.
    pub accepted: Vec<EntityId>,
    /// Entities that were already present.
    pub duplicates: usize,
    pub rejected: Vec<RejectedEntity>,
}

impl IngestReport {
    pub fn merge(&mut self, other: Self) {
        self.accepted.extend(other.accepted);
        self.duplicates += other.duplicates;
        self.rejected.extend(other.rejected);
    }
}

/// Append-only entity store.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<EntityId, DiagnosticEntity>,
    superseded: BTreeSet<EntityId>,
    rejected: Vec<RejectedEntity>,
    embedding_dim: Option<usize>,
}

impl EntityRegistry {
    pub fn new(embedding_dim: Option<usize>) -> Self {
        Self {
            embedding_dim,
            ..Self::default()
        }
    }

    /// Seal and ingest a batch of submissions.
    ///
    /// Malformed submissions are rejected individually; the rest of the
    /// batch is still ingested.
    pub fn ingest<I>(&mut self, submissions: I) -> IngestReport
    where
        I: IntoIterator<Item = EntitySubmission>,
    {
        self.ingest_entities(submissions.into_iter().map(EntitySubmission::seal))
    }

    /// Ingest entities that already carry an id. The id is re-checked
    /// against the content.
    pub fn ingest_entities<I>(&mut self, entities: I) -> IngestReport
    where
        I: IntoIterator<Item = DiagnosticEntity>,
    {
        let mut report = IngestReport::default();
        for entity in entities {
            let id = entity.id().clone();
            match self.insert(entity) {
                Ok(true) => report.accepted.push(id),
                Ok(false) => report.duplicates += 1,
                Err(err) => {
                    warn!(entity_id = %id.short(), error = %err, "Rejected entity at ingestion");
                    let rejected = RejectedEntity {
                        entity_id: Some(id),
                        reason: err.to_string(),
                    };
                    self.rejected.push(rejected.clone());
                    report.rejected.push(rejected);
                }
            }
        }
        debug!(
            accepted = report.accepted.len(),
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "Ingested entity batch"
        );
        report
    }

    /// Insert one entity. `Ok(false)` when an identical entity is already
    /// stored.
    pub fn insert(&mut self, entity: DiagnosticEntity) -> FusionResult<bool> {
        entity.validate(self.embedding_dim)?;
        if self.entities.contains_key(entity.id()) {
            return Ok(false);
        }
        if let Some(previous) = entity.supersedes() {
            if previous == entity.id() {
                return Err(FusionError::malformed(
                    Some(entity.id()),
                    "entity supersedes itself",
                ));
            }
            if !self.entities.contains_key(previous) {
                return Err(FusionError::malformed(
                    Some(entity.id()),
                    format!("supersedes unknown entity {}", previous.short()),
                ));
            }
            self.superseded.insert(previous.clone());
        }
        self.entities.insert(entity.id().clone(), entity);
        Ok(true)
    }

    pub fn get(&self, id: &EntityId) -> Option<&DiagnosticEntity> {
        self.entities.get(id)
    }

    pub fn is_active(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id) && !self.superseded.contains(id)
    }

    /// Entities not superseded by a revision, in id order.
    pub fn active_entities(&self) -> Vec<DiagnosticEntity> {
        self.entities
            .values()
            .filter(|entity| !self.superseded.contains(entity.id()))
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.entities.len() - self.superseded.len()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Everything turned away since the registry was created.
    pub fn rejected(&self) -> &[RejectedEntity] {
        &self.rejected
    }

    /// Digest over every stored id and its active flag, in id order.
    pub fn snapshot_digest(&self) -> FusionResult<String> {
        let snapshot: Vec<(&EntityId, bool)> = self
            .entities
            .keys()
            .map(|id| (id, !self.superseded.contains(id)))
            .collect();
        Ok(digest_hex(&serde_json::to_vec(&snapshot)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EntityPayload, Geometry, Modality};

    fn measurement(label: &str, volume: f64) -> EntitySubmission {
        EntitySubmission::new(
            Modality::Segmentation,
            EntityPayload::Measurement {
                label: label.to_string(),
                geometry: Geometry::at([0.0, 0.0, 0.0]),
                volume_mm3: Some(volume),
            },
            0.9,
        )
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let mut registry = EntityRegistry::new(None);
        let first = registry.ingest([measurement("liver", 1.0)]);
        let second = registry.ingest([measurement("liver", 1.0)]);
        assert_eq!(first.accepted.len(), 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_malformed_entity_does_not_stop_batch() {
        let mut registry = EntityRegistry::new(None);
        let report = registry.ingest([measurement("", 1.0), measurement("spleen", 2.0)]);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(registry.rejected().len(), 1);
    }

    #[test]
    fn test_revision_supersedes_previous() {
        let mut registry = EntityRegistry::new(None);
        let original = registry.ingest([measurement("lesion", 100.0)]).accepted[0].clone();
        let before = registry.snapshot_digest().unwrap();

        let revision = measurement("lesion", 120.0).superseding(original.clone());
        let report = registry.ingest([revision]);
        assert_eq!(report.accepted.len(), 1);
        assert!(!registry.is_active(&original));
        assert!(registry.get(&original).is_some());
        assert_eq!(registry.active_count(), 1);
        assert_ne!(before, registry.snapshot_digest().unwrap());
    }

    #[test]
    fn test_revision_of_unknown_entity_rejected() {
        let mut registry = EntityRegistry::new(None);
        let report = registry.ingest([measurement("lesion", 1.0).superseding("deadbeef".into())]);
        assert_eq!(report.rejected.len(), 1);
        assert!(registry.is_empty());
    }
}
