//! `verify`: check a persisted audit chain.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::errors::FusionError;
use crate::domain::ports::AuditStore;
use crate::infrastructure::persistence::JsonlAuditStore;
use crate::services::verify;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// JSONL audit chain written by `run --audit-out`
    pub chain: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct VerifyOutput {
    pub path: PathBuf,
    pub entries: usize,
    pub intact: bool,
    pub head_hash: Option<String>,
    pub failed_index: Option<u64>,
    pub reason: Option<String>,
}

impl CommandOutput for VerifyOutput {
    fn to_human(&self) -> String {
        if self.intact {
            format!(
                "Audit chain {} is intact: {} entries, head {}",
                self.path.display(),
                self.entries,
                self.head_hash.as_deref().map_or("-", |h| &h[..h.len().min(16)])
            )
        } else {
            format!(
                "Audit chain {} is CORRUPTED at entry {}: {}",
                self.path.display(),
                self.failed_index.unwrap_or_default(),
                self.reason.as_deref().unwrap_or("unknown")
            )
        }
    }
}

pub async fn execute(args: VerifyArgs, json_mode: bool) -> Result<()> {
    let store = JsonlAuditStore::open(args.chain.clone());
    let records = store.load().await?;

    let result = verify(&records);
    let (failed_index, reason) = match &result {
        Err(FusionError::AuditChainCorrupted { index, reason }) => (Some(*index), Some(reason.clone())),
        Err(other) => return Err(anyhow::anyhow!("Failed to verify audit chain: {other}")),
        Ok(()) => (None, None),
    };

    output(
        &VerifyOutput {
            path: args.chain,
            entries: records.len(),
            intact: result.is_ok(),
            head_hash: records.last().map(|r| r.entry.state_hash.clone()),
            failed_index,
            reason,
        },
        json_mode,
    );

    result.map_err(Into::into)
}
