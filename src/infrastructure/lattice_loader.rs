//! Constraint lattice definition files.
//!
//! `.json` files are parsed as JSON; anything else as YAML.

use std::path::Path;

use tracing::info;

use crate::domain::errors::{FusionError, FusionResult};
use crate::domain::models::{ConstraintLattice, LatticeDefinition};

/// Parse a lattice definition without building the lattice.
pub fn load_definition(path: &Path) -> FusionResult<LatticeDefinition> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FusionError::Configuration(format!("cannot read lattice {}: {e}", path.display()))
    })?;
    parse_definition(&content, is_json(path)).map_err(|reason| {
        FusionError::Configuration(format!("invalid lattice {}: {reason}", path.display()))
    })
}

/// Load and validate a lattice.
pub fn load_lattice(path: &Path) -> FusionResult<ConstraintLattice> {
    let lattice = ConstraintLattice::new(load_definition(path)?)?;
    info!(path = %path.display(), nodes = lattice.len(), "Loaded constraint lattice");
    Ok(lattice)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn parse_definition(content: &str, json: bool) -> Result<LatticeDefinition, String> {
    if json {
        serde_json::from_str(content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }
}
