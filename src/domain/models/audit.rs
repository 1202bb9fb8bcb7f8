//! Hash-chained audit records.
//!
//! `state_hash = SHA256(canonical(state) || parent_hash)`. The genesis entry
//! uses [`GENESIS_SEED_HASH`] as its parent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::state::StateVector;
use crate::domain::errors::FusionResult;

/// Well-known parent hash of the genesis entry.
pub const GENESIS_SEED_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One link of the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub state_hash: String,
    pub parent_hash: String,
    pub inputs_digest: String,
}

impl AuditEntry {
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// Persisted unit of the chain: the entry plus the state it commits to,
/// which is what makes hash recomputation possible after reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub entry: AuditEntry,
    pub state: StateVector,
}

/// Hex SHA-256 of arbitrary bytes.
pub fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash a committed state onto its parent.
pub fn compute_state_hash(state: &StateVector, parent_hash: &str) -> FusionResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(state.canonical_bytes()?);
    hasher.update(parent_hash.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
