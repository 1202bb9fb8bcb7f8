use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::agent::AgentRegistration;

/// Main configuration structure for the fusion engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Affinity graph scoring thresholds
    #[serde(default)]
    pub affinity: AffinityConfig,

    /// Convergence loop gates and update function
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    /// Multi-agent arbitration
    #[serde(default)]
    pub harmonizer: HarmonizerConfig,

    /// Agent registry and call limits
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Audit chain persistence
    #[serde(default)]
    pub audit: AuditConfig,

    /// Constraint lattice definition file (YAML or JSON)
    #[serde(default)]
    pub lattice_path: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Affinity graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AffinityConfig {
    /// Cosine similarity an embedding pair must exceed to be linked.
    /// The default is a deployment placeholder; override it with the
    /// site-validated cutoff.
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f64,

    /// Spatial affinity (`exp(-d / scale)`) a pair must exceed
    #[serde(default = "default_spatial_threshold")]
    pub spatial_threshold: f64,

    /// Distance scale for spatial affinity, in mm
    #[serde(default = "default_spatial_scale_mm")]
    pub spatial_scale_mm: f64,

    /// Temporal affinity (`exp(-Δh / horizon)`) a pair must exceed
    #[serde(default = "default_temporal_threshold")]
    pub temporal_threshold: f64,

    /// Time scale for temporal affinity, in hours
    #[serde(default = "default_temporal_horizon_hours")]
    pub temporal_horizon_hours: f64,

    /// Required embedding width, if fixed by the embedding collaborator
    #[serde(default)]
    pub embedding_dim: Option<usize>,
}

const fn default_semantic_threshold() -> f64 {
    0.80
}

const fn default_spatial_threshold() -> f64 {
    0.50
}

const fn default_spatial_scale_mm() -> f64 {
    25.0
}

const fn default_temporal_threshold() -> f64 {
    0.50
}

const fn default_temporal_horizon_hours() -> f64 {
    72.0
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: default_semantic_threshold(),
            spatial_threshold: default_spatial_threshold(),
            spatial_scale_mm: default_spatial_scale_mm(),
            temporal_threshold: default_temporal_threshold(),
            temporal_horizon_hours: default_temporal_horizon_hours(),
            embedding_dim: None,
        }
    }
}

/// Convergence controller configuration
///
/// `norm_epsilon` and `entropy_gamma` are the two stopping gates; either one
/// firing ends the run. `max_iterations` guarantees termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConvergenceConfig {
    /// ε: stop when `‖v_{t+1} - v_t‖ < ε`. Default 0.01.
    #[serde(default = "default_norm_epsilon")]
    pub norm_epsilon: f64,

    /// γ: stop when `|H_{t+1} - H_t| < γ`. Default 0.001. Zero disables the gate.
    #[serde(default = "default_entropy_gamma")]
    pub entropy_gamma: f64,

    /// Iteration ceiling. Default 50.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// α in `c' = c + α (c_target - c)` for unchanged truth values. Default 0.5.
    #[serde(default = "default_relaxation")]
    pub relaxation: f64,

    /// Evidence at or above this asserts a node, below refutes it. Default 0.5.
    #[serde(default = "default_assert_threshold")]
    pub assert_threshold: f64,
}

const fn default_norm_epsilon() -> f64 {
    0.01
}

const fn default_entropy_gamma() -> f64 {
    0.001
}

const fn default_max_iterations() -> u64 {
    50
}

const fn default_relaxation() -> f64 {
    0.5
}

const fn default_assert_threshold() -> f64 {
    0.5
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            norm_epsilon: default_norm_epsilon(),
            entropy_gamma: default_entropy_gamma(),
            max_iterations: default_max_iterations(),
            relaxation: default_relaxation(),
            assert_threshold: default_assert_threshold(),
        }
    }
}

/// Harmonizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarmonizerConfig {
    /// Scores within this distance of the maximum are treated as tied
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,

    /// Winning `w · S` below this requests resegmentation
    #[serde(default = "default_resegmentation_floor")]
    pub resegmentation_floor: f64,

    /// Resegmentation attempts per iteration before `NoCandidates` is fatal
    #[serde(default = "default_max_resegmentation_retries")]
    pub max_resegmentation_retries: u32,
}

const fn default_tie_epsilon() -> f64 {
    1e-9
}

const fn default_resegmentation_floor() -> f64 {
    0.25
}

const fn default_max_resegmentation_retries() -> u32 {
    3
}

impl Default for HarmonizerConfig {
    fn default() -> Self {
        Self {
            tie_epsilon: default_tie_epsilon(),
            resegmentation_floor: default_resegmentation_floor(),
            max_resegmentation_retries: default_max_resegmentation_retries(),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentsConfig {
    /// Per-call timeout for external agents, in milliseconds
    #[serde(default = "default_agent_timeout_ms")]
    pub timeout_ms: u64,

    /// Registered agents with their trust scores, in registration order
    #[serde(default)]
    pub registry: Vec<AgentRegistration>,
}

const fn default_agent_timeout_ms() -> u64 {
    30_000
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_agent_timeout_ms(),
            registry: Vec::new(),
        }
    }
}

/// Audit chain configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    /// Line-delimited JSON file the chain is written through to
    #[serde(default)]
    pub chain_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
