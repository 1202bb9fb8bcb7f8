//! Audit chain persistence port.

use async_trait::async_trait;

use crate::domain::errors::FusionResult;
use crate::domain::models::AuditRecord;

/// Append-only store for audit records.
///
/// Implementations must preserve record order and content bit-for-bit so
/// that a reloaded chain verifies exactly as it was written.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one record after all previously appended records.
    async fn append(&self, record: &AuditRecord) -> FusionResult<()>;

    /// Load every record in append order.
    async fn load(&self) -> FusionResult<Vec<AuditRecord>>;
}
