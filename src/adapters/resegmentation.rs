//! Resegmentation handlers.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::errors::FusionResult;
use crate::domain::models::{EntitySubmission, ResegmentationRequest};
use crate::domain::ports::ResegmentationHandler;

/// Acknowledges requests without producing revisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResegmentation;

#[async_trait]
impl ResegmentationHandler for NullResegmentation {
    async fn resegment(
        &self,
        requests: &[ResegmentationRequest],
    ) -> FusionResult<Vec<EntitySubmission>> {
        debug!(requests = requests.len(), "Resegmentation requested; no handler attached");
        Ok(Vec::new())
    }
}

/// Returns a prepared batch of revisions per call and records what it was
/// asked for.
#[derive(Debug, Default)]
pub struct ScriptedResegmentation {
    batches: Mutex<VecDeque<Vec<EntitySubmission>>>,
    received: Mutex<Vec<ResegmentationRequest>>,
}

impl ScriptedResegmentation {
    pub fn new<I>(batches: I) -> Self
    where
        I: IntoIterator<Item = Vec<EntitySubmission>>,
    {
        Self {
            batches: Mutex::new(batches.into_iter().collect()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, in order.
    pub async fn received(&self) -> Vec<ResegmentationRequest> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl ResegmentationHandler for ScriptedResegmentation {
    async fn resegment(
        &self,
        requests: &[ResegmentationRequest],
    ) -> FusionResult<Vec<EntitySubmission>> {
        self.received.lock().await.extend_from_slice(requests);
        Ok(self.batches.lock().await.pop_front().unwrap_or_default())
    }
}
