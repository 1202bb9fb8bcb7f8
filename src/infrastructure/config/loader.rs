use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::TrustRegistry;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {name}: {value}. Must be between 0 and 1")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Invalid {name}: {value}. Must be positive")]
    NonPositive { name: &'static str, value: f64 },

    #[error("Invalid entropy_gamma: {0}. Cannot be negative")]
    NegativeEntropyGamma(f64),

    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u64),

    #[error("Invalid relaxation: {0}. Must be in (0, 1]")]
    InvalidRelaxation(f64),

    #[error("Invalid agent timeout_ms: {0}. Must be positive")]
    InvalidAgentTimeout(u64),

    #[error("Invalid embedding_dim: 0. Must be at least 1")]
    InvalidEmbeddingDim,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .msk-fusion/config.yaml (project config)
    /// 3. .msk-fusion/local.yaml (local overrides, optional)
    /// 4. Environment variables (MSK_FUSION_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".msk-fusion/config.yaml"))
            .merge(Yaml::file(".msk-fusion/local.yaml"))
            .merge(Env::prefixed("MSK_FUSION_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("MSK_FUSION_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let affinity = &config.affinity;
        for (name, value) in [
            ("semantic_threshold", affinity.semantic_threshold),
            ("spatial_threshold", affinity.spatial_threshold),
            ("temporal_threshold", affinity.temporal_threshold),
            ("assert_threshold", config.convergence.assert_threshold),
            ("resegmentation_floor", config.harmonizer.resegmentation_floor),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }

        for (name, value) in [
            ("spatial_scale_mm", affinity.spatial_scale_mm),
            ("temporal_horizon_hours", affinity.temporal_horizon_hours),
            ("norm_epsilon", config.convergence.norm_epsilon),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        if affinity.embedding_dim == Some(0) {
            return Err(ConfigError::InvalidEmbeddingDim);
        }

        let gamma = config.convergence.entropy_gamma;
        if !gamma.is_finite() || gamma < 0.0 {
            return Err(ConfigError::NegativeEntropyGamma(gamma));
        }

        if config.convergence.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(0));
        }

        let relaxation = config.convergence.relaxation;
        if !relaxation.is_finite() || relaxation <= 0.0 || relaxation > 1.0 {
            return Err(ConfigError::InvalidRelaxation(relaxation));
        }

        let tie = config.harmonizer.tie_epsilon;
        if !tie.is_finite() || tie < 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "tie_epsilon {tie} cannot be negative"
            )));
        }

        if config.agents.timeout_ms == 0 {
            return Err(ConfigError::InvalidAgentTimeout(0));
        }

        TrustRegistry::new(config.agents.registry.clone())
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}
