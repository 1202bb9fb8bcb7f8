//! Diagnostic entities: immutable facts extracted from one modality.
//!
//! Upstream collaborators (segmentation, OCR/NLP, embedding) hand over
//! [`EntitySubmission`]s. Sealing a submission derives its content id and
//! yields a [`DiagnosticEntity`], which is never mutated afterwards; a
//! correction is a new entity that `supersedes` the old one.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::errors::{FusionError, FusionResult};

/// Stable, content-derived entity identifier (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for tables and log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Modality an entity was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Segmentation masks and the measurements derived from them.
    Segmentation,
    /// OCR / NLP extraction from clinical documents.
    ClinicalText,
    /// Image-level findings (classifiers, visual question answering).
    Imaging,
}

impl Modality {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Segmentation => "segmentation",
            Self::ClinicalText => "clinical_text",
            Self::Imaging => "imaging",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity kind, always derived from the payload variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Measurement,
    Finding,
    TextEntity,
}

impl EntityKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Measurement => "measurement",
            Self::Finding => "finding",
            Self::TextEntity => "text_entity",
        }
    }
}

/// Clinical severity attached to a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Normal,
}

/// Axis-aligned box in patient coordinates (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// Spatial extent of a region of interest (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub centroid: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl Geometry {
    pub const fn at(centroid: [f64; 3]) -> Self {
        Self {
            centroid,
            bounding_box: None,
        }
    }

    /// Euclidean distance between centroids.
    pub fn distance_to(&self, other: &Self) -> f64 {
        self.centroid
            .iter()
            .zip(other.centroid.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    fn is_finite(&self) -> bool {
        let box_finite = self.bounding_box.is_none_or(|b| {
            b.min.iter().chain(b.max.iter()).all(|v| v.is_finite())
                && b.min.iter().zip(b.max.iter()).all(|(lo, hi)| lo <= hi)
        });
        self.centroid.iter().all(|v| v.is_finite()) && box_finite
    }
}

/// Character span of a text entity in its source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Typed payload of an entity. The variant tag is the entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityPayload {
    Measurement {
        label: String,
        geometry: Geometry,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        volume_mm3: Option<f64>,
    },
    Finding {
        label: String,
        severity: Severity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Geometry>,
    },
    TextEntity {
        label: String,
        span: TextSpan,
    },
}

impl EntityPayload {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Measurement { .. } => EntityKind::Measurement,
            Self::Finding { .. } => EntityKind::Finding,
            Self::TextEntity { .. } => EntityKind::TextEntity,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Measurement { label, .. }
            | Self::Finding { label, .. }
            | Self::TextEntity { label, .. } => label,
        }
    }

    pub const fn geometry(&self) -> Option<&Geometry> {
        match self {
            Self::Measurement { geometry, .. } => Some(geometry),
            Self::Finding { region, .. } => region.as_ref(),
            Self::TextEntity { .. } => None,
        }
    }

    pub const fn volume_mm3(&self) -> Option<f64> {
        match self {
            Self::Measurement { volume_mm3, .. } => *volume_mm3,
            _ => None,
        }
    }

    /// Case-insensitive label comparison.
    pub fn has_label(&self, label: &str) -> bool {
        self.label().eq_ignore_ascii_case(label)
    }
}

/// An entity as delivered by an upstream collaborator, before its id exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySubmission {
    pub modality: Modality,
    pub payload: EntityPayload,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub derived_from: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<EntityId>,
}

impl EntitySubmission {
    pub const fn new(modality: Modality, payload: EntityPayload, confidence: f64) -> Self {
        Self {
            modality,
            payload,
            confidence,
            embedding: None,
            observed_at: None,
            derived_from: BTreeSet::new(),
            supersedes: None,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub const fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    #[must_use]
    pub fn derived_from<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.derived_from.extend(sources.into_iter().map(Into::into));
        self
    }

    /// Mark this submission as a revision of an existing entity.
    #[must_use]
    pub fn superseding(mut self, previous: EntityId) -> Self {
        self.supersedes = Some(previous);
        self
    }

    /// Content-derived id over the canonical JSON form of the submission.
    pub fn content_id(&self) -> EntityId {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        EntityId(format!("{:x}", Sha256::digest(&canonical)))
    }

    /// Derive the id and freeze the submission into an entity.
    pub fn seal(self) -> DiagnosticEntity {
        let id = self.content_id();
        DiagnosticEntity { id, inner: self }
    }
}

/// An immutable fact derived from one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEntity {
    id: EntityId,
    #[serde(flatten)]
    inner: EntitySubmission,
}

impl DiagnosticEntity {
    pub const fn id(&self) -> &EntityId {
        &self.id
    }

    pub const fn kind(&self) -> EntityKind {
        self.inner.payload.kind()
    }

    pub const fn modality(&self) -> Modality {
        self.inner.modality
    }

    pub const fn payload(&self) -> &EntityPayload {
        &self.inner.payload
    }

    pub fn label(&self) -> &str {
        self.inner.payload.label()
    }

    pub const fn confidence(&self) -> f64 {
        self.inner.confidence
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.inner.embedding.as_deref()
    }

    pub const fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.observed_at
    }

    pub const fn derived_from(&self) -> &BTreeSet<String> {
        &self.inner.derived_from
    }

    pub const fn supersedes(&self) -> Option<&EntityId> {
        self.inner.supersedes.as_ref()
    }

    /// Whether the stored id still matches the entity content.
    pub fn verify_id(&self) -> bool {
        self.inner.content_id() == self.id
    }

    /// Check the modality-specific shape and value ranges.
    ///
    /// `embedding_dim` enforces a fixed embedding width when configured.
    pub fn validate(&self, embedding_dim: Option<usize>) -> FusionResult<()> {
        let id = Some(&self.id);
        if !self.verify_id() {
            return Err(FusionError::malformed(id, "id does not match entity content"));
        }
        if self.label().trim().is_empty() {
            return Err(FusionError::malformed(id, "empty label"));
        }
        if !self.confidence().is_finite() || !(0.0..=1.0).contains(&self.confidence()) {
            return Err(FusionError::malformed(
                id,
                format!("confidence {} outside [0, 1]", self.confidence()),
            ));
        }

        match (self.modality(), self.payload()) {
            (Modality::Segmentation, EntityPayload::Measurement { volume_mm3, .. }) => {
                if volume_mm3.is_some_and(|v| !v.is_finite() || v < 0.0) {
                    return Err(FusionError::malformed(id, "invalid volume"));
                }
            }
            (Modality::ClinicalText, EntityPayload::TextEntity { span, .. }) => {
                if span.start >= span.end || span.text.trim().is_empty() {
                    return Err(FusionError::malformed(
                        id,
                        format!("empty text span [{}, {})", span.start, span.end),
                    ));
                }
            }
            (Modality::Imaging, EntityPayload::Finding { .. }) => {}
            (modality, payload) => {
                return Err(FusionError::malformed(
                    id,
                    format!(
                        "{} payload is not valid for {modality} modality",
                        payload.kind().as_str()
                    ),
                ));
            }
        }

        if let Some(geometry) = self.payload().geometry() {
            if !geometry.is_finite() {
                return Err(FusionError::malformed(id, "non-finite geometry"));
            }
        }

        if let Some(embedding) = self.embedding() {
            if embedding.is_empty() {
                return Err(FusionError::malformed(id, "empty embedding"));
            }
            if let Some(dim) = embedding_dim {
                if embedding.len() != dim {
                    return Err(FusionError::malformed(
                        id,
                        format!("embedding dimension {} != {dim}", embedding.len()),
                    ));
                }
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                return Err(FusionError::malformed(id, "non-finite embedding"));
            }
            if embedding.iter().all(|v| *v == 0.0) {
                return Err(FusionError::malformed(id, "zero-norm embedding"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kidney_measurement() -> EntitySubmission {
        EntitySubmission::new(
            Modality::Segmentation,
            EntityPayload::Measurement {
                label: "kidney_left".to_string(),
                geometry: Geometry::at([10.0, 20.0, 30.0]),
                volume_mm3: Some(150_000.0),
            },
            0.92,
        )
        .with_embedding(vec![0.1, 0.2, 0.3])
    }

    #[test]
    fn test_id_is_content_derived() {
        let a = kidney_measurement().seal();
        let b = kidney_measurement().seal();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().as_str().len(), 64);

        let c = kidney_measurement().derived_from(["mask-7"]).seal();
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_kind_follows_payload() {
        let entity = kidney_measurement().seal();
        assert_eq!(entity.kind(), EntityKind::Measurement);
        assert_eq!(entity.label(), "kidney_left");
        assert!(entity.validate(Some(3)).is_ok());
    }

    #[test]
    fn test_modality_payload_mismatch_is_malformed() {
        let entity = EntitySubmission::new(
            Modality::ClinicalText,
            EntityPayload::Finding {
                label: "mass".to_string(),
                severity: Severity::High,
                region: None,
            },
            0.5,
        )
        .seal();
        let err = entity.validate(None).unwrap_err();
        assert!(matches!(err, FusionError::MalformedEntity { .. }));
    }

    #[test]
    fn test_text_span_must_be_non_empty() {
        let entity = EntitySubmission::new(
            Modality::ClinicalText,
            EntityPayload::TextEntity {
                label: "renal cyst".to_string(),
                span: TextSpan {
                    start: 5,
                    end: 5,
                    text: String::new(),
                },
            },
            0.7,
        )
        .seal();
        assert!(entity.validate(None).is_err());
    }

    #[test]
    fn test_embedding_checks() {
        let wrong_dim = kidney_measurement().seal();
        assert!(wrong_dim.validate(Some(4)).is_err());

        let zero = kidney_measurement().with_embedding(vec![0.0; 3]).seal();
        assert!(zero.validate(None).is_err());
    }

    #[test]
    fn test_tampered_entity_fails_id_check() {
        let entity = kidney_measurement().seal();
        let mut json = serde_json::to_value(&entity).unwrap();
        json["confidence"] = serde_json::json!(0.10);
        let tampered: DiagnosticEntity = serde_json::from_value(json).unwrap();
        assert!(!tampered.verify_id());
        assert!(tampered.validate(None).is_err());
    }

    #[test]
    fn test_serde_shape() {
        let entity = kidney_measurement().seal();
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["payload"]["kind"], "measurement");
        assert_eq!(json["modality"], "segmentation");
        let back: DiagnosticEntity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
    }
}
