//! In-memory audit store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::FusionResult;
use crate::domain::models::AuditRecord;
use crate::domain::ports::AuditStore;

/// Audit store backed by a vector. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`, as if loaded from elsewhere.
    pub fn from_records(records: Vec<AuditRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> FusionResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn load(&self) -> FusionResult<Vec<AuditRecord>> {
        Ok(self.records.read().await.clone())
    }
}
