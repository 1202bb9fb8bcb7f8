//! Domain layer for the diagnostic fusion engine
//!
//! This module contains the pure data model, the error taxonomy, and the
//! port traits implemented by external collaborators.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{FusionError, FusionResult};
