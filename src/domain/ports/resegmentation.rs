//! Resegmentation port.

use async_trait::async_trait;

use crate::domain::errors::FusionResult;
use crate::domain::models::{EntitySubmission, ResegmentationRequest};

/// Segmentation collaborator that re-derives entities from original source
/// data. Returned submissions are ingested as revisions (usually with
/// `supersedes` pointing at the requested entity).
#[async_trait]
pub trait ResegmentationHandler: Send + Sync {
    async fn resegment(
        &self,
        requests: &[ResegmentationRequest],
    ) -> FusionResult<Vec<EntitySubmission>>;
}
