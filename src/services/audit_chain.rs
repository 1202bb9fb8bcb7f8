//! Hash-chained audit logger.
//!
//! The logger is the single writer of the chain. Appends are serialized by a
//! mutex because each entry hashes onto the previous one. Once a broken link
//! is detected the logger halts and refuses every append until a verified
//! chain is supplied through [`AuditLogger::restore`]; the broken suffix is
//! never truncated or repaired here.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::domain::errors::{FusionError, FusionResult};
use crate::domain::models::{
    compute_state_hash, digest_hex, AgentId, AgentOutput, AuditEntry, AuditRecord, StateVector,
    GENESIS_SEED_HASH,
};
use crate::domain::ports::AuditStore;

#[derive(Debug, Default)]
struct ChainState {
    records: Vec<AuditRecord>,
    halted: Option<(u64, String)>,
}

/// Append-only owner of the audit chain for one run.
pub struct AuditLogger {
    chain: Mutex<ChainState>,
    store: Option<Arc<dyn AuditStore>>,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// In-memory logger with an empty chain.
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(ChainState::default()),
            store: None,
        }
    }

    /// Logger that writes every record through to `store`, starting from an
    /// empty chain.
    pub fn with_store(store: Arc<dyn AuditStore>) -> Self {
        Self {
            chain: Mutex::new(ChainState::default()),
            store: Some(store),
        }
    }

    /// Resume from whatever `store` already holds. A chain that fails
    /// verification is kept as loaded and the logger starts halted.
    pub async fn open(store: Arc<dyn AuditStore>) -> FusionResult<Self> {
        let records = store.load().await?;
        let halted = match verify(&records) {
            Ok(()) => None,
            Err(FusionError::AuditChainCorrupted { index, reason }) => {
                error!(index, reason = %reason, "Persisted audit chain is corrupted; commits halted");
                Some((index, reason))
            }
            Err(other) => return Err(other),
        };
        Ok(Self {
            chain: Mutex::new(ChainState { records, halted }),
            store: Some(store),
        })
    }

    /// Commit `state` onto the chain.
    ///
    /// The first append is the genesis entry (index 0, parent
    /// [`GENESIS_SEED_HASH`]). The current tail is re-verified before every
    /// append.
    pub async fn append(&self, state: &StateVector, inputs_digest: &str) -> FusionResult<AuditEntry> {
        let mut chain = self.chain.lock().await;
        if let Some((index, reason)) = &chain.halted {
            return Err(FusionError::AuditChainCorrupted {
                index: *index,
                reason: format!("commits halted: {reason}"),
            });
        }

        if let Err(err) = check_tail(&chain.records) {
            if let FusionError::AuditChainCorrupted { index, reason } = &err {
                error!(index, reason = %reason, "Audit chain tail failed verification; commits halted");
                chain.halted = Some((*index, reason.clone()));
            }
            return Err(err);
        }

        let parent_hash = chain
            .records
            .last()
            .map_or_else(|| GENESIS_SEED_HASH.to_string(), |r| r.entry.state_hash.clone());
        let entry = AuditEntry {
            index: chain.records.len() as u64,
            timestamp: Utc::now(),
            state_hash: compute_state_hash(state, &parent_hash)?,
            parent_hash,
            inputs_digest: inputs_digest.to_string(),
        };
        let record = AuditRecord {
            entry: entry.clone(),
            state: state.clone(),
        };

        if let Some(store) = &self.store {
            store.append(&record).await?;
        }
        chain.records.push(record);

        info!(
            index = entry.index,
            state_hash = %&entry.state_hash[..12],
            "Appended audit entry"
        );
        Ok(entry)
    }

    /// Verify the whole in-memory chain. A failure halts the logger.
    pub async fn verify_integrity(&self) -> FusionResult<()> {
        let mut chain = self.chain.lock().await;
        let result = verify(&chain.records);
        if let Err(FusionError::AuditChainCorrupted { index, reason }) = &result {
            error!(index, reason = %reason, "Audit chain failed verification; commits halted");
            chain.halted = Some((*index, reason.clone()));
        }
        result
    }

    /// Replace the chain with an externally remediated one. The replacement
    /// must verify; on success the halt is lifted.
    pub async fn restore(&self, records: Vec<AuditRecord>) -> FusionResult<()> {
        verify(&records)?;
        let mut chain = self.chain.lock().await;
        info!(entries = records.len(), "Audit chain restored");
        chain.records = records;
        chain.halted = None;
        Ok(())
    }

    pub async fn is_halted(&self) -> bool {
        self.chain.lock().await.halted.is_some()
    }

    pub async fn len(&self) -> usize {
        self.chain.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chain.lock().await.records.is_empty()
    }

    /// Snapshot of every record in order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.chain.lock().await.records.clone()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.chain
            .lock()
            .await
            .records
            .iter()
            .map(|r| r.entry.clone())
            .collect()
    }

    /// State hash of the newest entry.
    pub async fn head_hash(&self) -> Option<String> {
        self.chain
            .lock()
            .await
            .records
            .last()
            .map(|r| r.entry.state_hash.clone())
    }
}

fn corrupted(index: u64, reason: impl Into<String>) -> FusionError {
    FusionError::AuditChainCorrupted {
        index,
        reason: reason.into(),
    }
}

fn check_link(entries: &[&AuditEntry], position: usize) -> FusionResult<()> {
    let entry = entries[position];
    let expected_index = position as u64;
    if entry.index != expected_index {
        return Err(corrupted(
            expected_index,
            format!("index {} out of sequence", entry.index),
        ));
    }
    let expected_parent = if position == 0 {
        GENESIS_SEED_HASH
    } else {
        entries[position - 1].state_hash.as_str()
    };
    if entry.parent_hash != expected_parent {
        return Err(corrupted(expected_index, "parent hash does not match previous state hash"));
    }
    Ok(())
}

fn check_hash(record: &AuditRecord) -> FusionResult<()> {
    let recomputed = compute_state_hash(&record.state, &record.entry.parent_hash)?;
    if recomputed != record.entry.state_hash {
        return Err(corrupted(
            record.entry.index,
            "state hash does not match recorded state",
        ));
    }
    Ok(())
}

/// Check index continuity, the genesis parent and parent-hash linkage.
pub fn verify_linkage(entries: &[AuditEntry]) -> FusionResult<()> {
    let refs: Vec<&AuditEntry> = entries.iter().collect();
    (0..refs.len()).try_for_each(|position| check_link(&refs, position))
}

/// Linkage plus recomputation of every state hash. Reports the first
/// failing index.
pub fn verify(records: &[AuditRecord]) -> FusionResult<()> {
    let refs: Vec<&AuditEntry> = records.iter().map(|r| &r.entry).collect();
    for (position, record) in records.iter().enumerate() {
        check_link(&refs, position)?;
        check_hash(record)?;
    }
    Ok(())
}

/// `verify` as a boolean.
pub fn is_intact(records: &[AuditRecord]) -> bool {
    verify(records).is_ok()
}

/// Only the newest record: its link to the previous entry and its hash.
fn check_tail(records: &[AuditRecord]) -> FusionResult<()> {
    let Some(last) = records.last() else {
        return Ok(());
    };
    let refs: Vec<&AuditEntry> = records.iter().map(|r| &r.entry).collect();
    check_link(&refs, refs.len() - 1)?;
    check_hash(last)
}

#[derive(Serialize)]
struct IterationInputs<'a> {
    candidates: Vec<&'a AgentOutput>,
    selected: Option<&'a AgentId>,
}

/// Digest of the agent inputs behind one commit: the candidate set sorted by
/// agent id, plus the selected agent.
pub fn inputs_digest(candidates: &[AgentOutput], selected: Option<&AgentId>) -> FusionResult<String> {
    let mut sorted: Vec<&AgentOutput> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    let inputs = IterationInputs {
        candidates: sorted,
        selected,
    };
    Ok(digest_hex(&serde_json::to_vec(&inputs)?))
}
