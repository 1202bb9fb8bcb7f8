//! CLI command implementations.

pub mod graph;
pub mod lattice;
pub mod run;
pub mod verify;

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::models::EntitySubmission;

/// Read an entity batch: a JSON array of submissions.
pub fn load_submissions(path: &Path) -> Result<Vec<EntitySubmission>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read entities from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse entities in {}", path.display()))
}
