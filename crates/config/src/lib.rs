//! Configuration loading, validation, and management for Cadence.
//!
//! Loads configuration from `~/.cadence/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use cadence_core::validation::{OperationType, RiskLevel, TimeoutBehavior, ValidationMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cadence/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Memory storage and retrieval
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Human-in-the-loop gating
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Nested orchestration limits
    #[serde(default)]
    pub sub_agents: SubAgentConfig,

    /// Tool dispatch settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Hard cap on model calls per workflow
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Memories recalled into the system prompt
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_iterations() -> u32 {
    50
}
fn default_recall_limit() -> usize {
    5
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Use tools when they help you answer accurately.".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
            recall_limit: default_recall_limit(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackendKind {
    InMemory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackendKind,

    /// SQLite database file; defaults to `~/.cadence/memory.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Lifetime of `context` memories
    #[serde(default = "default_context_ttl_hours")]
    pub context_ttl_hours: u64,

    #[serde(default = "default_recency_half_life_hours")]
    pub recency_half_life_hours: f64,

    #[serde(default = "default_memory_limit")]
    pub default_limit: usize,
}

fn default_similarity_threshold() -> f32 {
    0.7
}
fn default_context_ttl_hours() -> u64 {
    24
}
fn default_recency_half_life_hours() -> f64 {
    168.0
}
fn default_memory_limit() -> usize {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackendKind::default(),
            path: None,
            similarity_threshold: default_similarity_threshold(),
            context_ttl_hours: default_context_ttl_hours(),
            recency_half_life_hours: default_recency_half_life_hours(),
            default_limit: default_memory_limit(),
        }
    }
}

impl MemoryConfig {
    /// The effective SQLite path.
    pub fn db_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memory.db"))
    }
}

/// Which operation categories are gated under `selective` mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectiveGates {
    #[serde(default)]
    pub tools: bool,
    #[serde(default = "default_true")]
    pub sub_agents: bool,
    #[serde(default = "default_true")]
    pub external_tools: bool,
    #[serde(default = "default_true")]
    pub file_ops: bool,
    #[serde(default = "default_true")]
    pub db_ops: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SelectiveGates {
    fn default() -> Self {
        Self {
            tools: false,
            sub_agents: true,
            external_tools: true,
            file_ops: true,
            db_ops: true,
        }
    }
}

impl SelectiveGates {
    pub fn gates(&self, operation: OperationType) -> bool {
        match operation {
            OperationType::Tool => self.tools,
            OperationType::SubAgent => self.sub_agents,
            OperationType::ExternalTool => self.external_tools,
            OperationType::FileOp => self.file_ops,
            OperationType::DbOp => self.db_ops,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: ValidationMode,

    /// Risks strictly below this proceed without gating
    #[serde(default = "default_auto_approve_below")]
    pub auto_approve_below: RiskLevel,

    /// Risks at or above this are always gated, even in `auto` mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_gate_at: Option<RiskLevel>,

    #[serde(default = "default_validation_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub on_timeout: TimeoutBehavior,

    #[serde(default = "default_max_reprompts")]
    pub max_reprompts: u32,

    #[serde(default)]
    pub selective: SelectiveGates,

    /// Per-tool risk overrides, keyed by tool name
    #[serde(default)]
    pub risk_overrides: HashMap<String, RiskLevel>,
}

fn default_auto_approve_below() -> RiskLevel {
    RiskLevel::Medium
}
fn default_validation_timeout_secs() -> u64 {
    120
}
fn default_max_reprompts() -> u32 {
    3
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            auto_approve_below: default_auto_approve_below(),
            force_gate_at: None,
            timeout_secs: default_validation_timeout_secs(),
            on_timeout: TimeoutBehavior::default(),
            max_reprompts: default_max_reprompts(),
            selective: SelectiveGates::default(),
            risk_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentConfig {
    /// Maximum nesting depth below the top-level workflow
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Iteration cap for nested runs (never above the parent's cap)
    #[serde(default = "default_sub_agent_iterations")]
    pub max_iterations: u32,

    /// Concurrent members of a parallel group
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Tasks accepted by a single `parallel_agents` call
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
}

fn default_max_depth() -> u32 {
    2
}
fn default_sub_agent_iterations() -> u32 {
    10
}
fn default_max_parallel() -> usize {
    4
}
fn default_max_parallel_tasks() -> usize {
    8
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_iterations: default_sub_agent_iterations(),
            max_parallel: default_max_parallel(),
            max_parallel_tasks: default_max_parallel_tasks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_external_timeout_secs")]
    pub external_timeout_secs: u64,

    /// Extra attempts after an external call times out
    #[serde(default)]
    pub external_retries: u32,
}

fn default_external_timeout_secs() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            external_timeout_secs: default_external_timeout_secs(),
            external_retries: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.cadence/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CADENCE_MODEL`
    /// - `CADENCE_MAX_ITERATIONS`
    /// - `CADENCE_VALIDATION_MODE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `CADENCE_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("CADENCE_MODEL") {
            self.agent.model = model;
        }

        if let Some(raw) = lookup("CADENCE_MAX_ITERATIONS") {
            self.agent.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CADENCE_MAX_ITERATIONS must be an integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(raw) = lookup("CADENCE_VALIDATION_MODE") {
            self.validation.mode = raw.trim().parse().map_err(ConfigError::ValidationError)?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cadence")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(1..=200).contains(&self.agent.max_iterations) {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be between 1 and 200".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.memory.similarity_threshold) {
            return Err(ConfigError::ValidationError(
                "memory.similarity_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.memory.recency_half_life_hours <= 0.0 {
            return Err(ConfigError::ValidationError(
                "memory.recency_half_life_hours must be > 0".into(),
            ));
        }

        if !(30..=300).contains(&self.validation.timeout_secs) {
            return Err(ConfigError::ValidationError(
                "validation.timeout_secs must be between 30 and 300".into(),
            ));
        }

        if self.sub_agents.max_iterations == 0 || self.sub_agents.max_parallel == 0 {
            return Err(ConfigError::ValidationError(
                "sub_agents.max_iterations and sub_agents.max_parallel must be > 0".into(),
            ));
        }

        if self.tools.external_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.external_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
