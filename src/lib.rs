//! MSK-IO diagnostic fusion engine
//!
//! Fuses entities extracted from segmentation masks, clinical text and
//! image-level findings into one symbolic diagnostic state. A run builds an
//! affinity graph over the entities, lets a set of inference agents propose
//! deltas against a constraint lattice, arbitrates them by trust-weighted
//! coherence, and commits each admissible state to a hash-chained audit log
//! until the state stops moving.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): data model, error taxonomy and ports
//! - **Service Layer** (`services`): graph building, validation, arbitration,
//!   the convergence loop and the audit chain
//! - **Adapters** (`adapters`): built-in agents, resegmentation handlers and
//!   an in-memory audit store
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging,
//!   lattice files and JSONL persistence
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use msk_fusion::{ConfigLoader, ConvergenceController, EntityRegistry, TrustRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let lattice = Arc::new(msk_fusion::infrastructure::lattice_loader::load_lattice(
//!         std::path::Path::new("lattice.yaml"),
//!     )?);
//!     let registry = Arc::new(TrustRegistry::new(config.agents.registry.clone())?);
//!     let controller = ConvergenceController::new(&config, lattice, registry);
//!     let mut entities = EntityRegistry::new(config.affinity.embedding_dim);
//!     let report = controller.run(&mut entities, Default::default()).await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    AgentOutput, Config, ConstraintLattice, DiagnosticEntity, EntitySubmission, RunOutcome,
    RunReport, StateVector, Transition, TrustRegistry,
};
pub use domain::ports::{AuditStore, InferenceAgent, ResegmentationHandler};
pub use domain::{FusionError, FusionResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{AuditLogger, ConvergenceController, EntityRegistry, Harmonizer};
