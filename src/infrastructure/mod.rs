//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Constraint lattice definition files
//! - Audit chain persistence (line-delimited JSON)

pub mod config;
pub mod lattice_loader;
pub mod logging;
pub mod persistence;
