//! TOML Configuration File Support
//!
//! Centralized configuration loading, supporting a TOML configuration file at
//! `~/.config/parley/parley.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`PARLEY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [sessions]
//! max_sessions = 10
//! session_timeout_secs = 1800
//!
//! [stream]
//! flush_interval_ms = 100
//! max_turns = 3
//!
//! [model]
//! default = "sonnet"
//!
//! [claude]
//! executable = "/usr/local/bin/claude"
//! extra_args = ["--permission-mode", "plan"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ClaudeCliConfig;
use crate::manager::ManagerSettings;
use crate::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_SESSIONS, DEFAULT_MAX_TURNS, DEFAULT_MODEL,
    DEFAULT_SESSION_TIMEOUT,
};

/// Maximum sessions
pub const ENV_MAX_SESSIONS: &str = "PARLEY_MAX_SESSIONS";
/// Idle timeout in seconds
pub const ENV_SESSION_TIMEOUT_SECS: &str = "PARLEY_SESSION_TIMEOUT_SECS";
/// Flush interval in milliseconds
pub const ENV_FLUSH_INTERVAL_MS: &str = "PARLEY_FLUSH_INTERVAL_MS";
/// Per-turn agentic turn limit
pub const ENV_MAX_TURNS: &str = "PARLEY_MAX_TURNS";
/// Default model
pub const ENV_DEFAULT_MODEL: &str = "PARLEY_DEFAULT_MODEL";
/// Path of the `claude` executable
pub const ENV_CLAUDE_PATH: &str = "PARLEY_CLAUDE_PATH";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[sessions]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsToml {
    /// Maximum concurrent sessions
    pub max_sessions: Option<usize>,
    /// Idle timeout in seconds
    pub session_timeout_secs: Option<u64>,
}

/// `[stream]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Flush buffer interval in milliseconds
    pub flush_interval_ms: Option<u64>,
    /// Agentic turn limit per send
    pub max_turns: Option<u32>,
}

/// `[model]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelToml {
    /// Model for sessions created without one
    pub default: Option<String>,
}

/// `[claude]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeToml {
    /// Executable name or path
    pub executable: Option<String>,
    /// Extra CLI arguments
    pub extra_args: Option<Vec<String>>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyToml {
    /// Session limits
    pub sessions: SessionsToml,
    /// Streaming behaviour
    pub stream: StreamToml,
    /// Model selection
    pub model: ModelToml,
    /// Claude CLI invocation
    pub claude: ClaudeToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration
#[derive(Clone, Debug)]
pub struct ParleyConfig {
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Idle timeout before eviction
    pub session_timeout: Duration,
    /// Flush buffer interval
    pub flush_interval: Duration,
    /// Agentic turn limit per send
    pub max_turns: u32,
    /// Model for sessions created without one
    pub default_model: String,
    /// Claude CLI invocation
    pub claude: ClaudeCliConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_turns: DEFAULT_MAX_TURNS,
            default_model: DEFAULT_MODEL.to_string(),
            claude: ClaudeCliConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ParleyConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a zero session capacity,
    /// a zero turn limit, or an empty default model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        if self.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "max_turns must be at least 1".to_string(),
            ));
        }
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default model must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for a [`SessionManager`](crate::manager::SessionManager)
    #[must_use]
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            max_sessions: self.max_sessions,
            session_timeout: self.session_timeout,
            flush_interval: self.flush_interval,
            max_turns: self.max_turns,
            default_model: self.default_model.clone(),
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/parley/parley.toml` or
/// `~/.config/parley/parley.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("parley").join("parley.toml"))
}

/// Load configuration from the default path, environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<ParleyConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ParleyConfig, ConfigError> {
    let mut config = ParleyConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ParleyToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ParleyConfig, toml: &ParleyToml) {
    if let Some(max) = toml.sessions.max_sessions {
        config.max_sessions = max;
    }
    if let Some(secs) = toml.sessions.session_timeout_secs {
        config.session_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = toml.stream.flush_interval_ms {
        config.flush_interval = Duration::from_millis(ms);
    }
    if let Some(turns) = toml.stream.max_turns {
        config.max_turns = turns;
    }
    if let Some(ref model) = toml.model.default {
        config.default_model.clone_from(model);
    }
    if let Some(ref exe) = toml.claude.executable {
        config.claude.executable.clone_from(exe);
    }
    if let Some(ref args) = toml.claude.extra_args {
        config.claude.extra_args.clone_from(args);
    }
}

/// Apply environment variable overrides to the config
///
/// Unparseable numeric values are ignored with a warning.
fn apply_env_config<F>(config: &mut ParleyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = |key: &str| -> Option<u64> {
        let raw = lookup(key)?;
        match raw.trim().parse::<u64>() {
            Ok(n) => Some(n),
            Err(_) => {
                tracing::warn!(var = key, value = %raw, "Ignoring non-numeric environment value");
                None
            }
        }
    };

    if let Some(n) = parsed(ENV_MAX_SESSIONS) {
        config.max_sessions = usize::try_from(n).unwrap_or(usize::MAX);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parsed(ENV_SESSION_TIMEOUT_SECS) {
        config.session_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed(ENV_FLUSH_INTERVAL_MS) {
        config.flush_interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(turns) = parsed(ENV_MAX_TURNS) {
        config.max_turns = u32::try_from(turns).unwrap_or(u32::MAX);
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup(ENV_DEFAULT_MODEL) {
        config.default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = lookup(ENV_CLAUDE_PATH) {
        config.claude.executable = path;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Default model override
    pub default_model: Option<String>,
    /// Claude executable override
    pub claude_path: Option<String>,
    /// Session capacity override
    pub max_sessions: Option<usize>,
    /// Flush interval override (milliseconds)
    pub flush_interval_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Set Claude executable override
    #[must_use]
    pub fn with_claude_path(mut self, path: impl Into<String>) -> Self {
        self.claude_path = Some(path.into());
        self
    }

    /// Set session capacity override
    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    /// Set flush interval override
    #[must_use]
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = Some(ms);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.default_model.is_none()
            && self.claude_path.is_none()
            && self.max_sessions.is_none()
            && self.flush_interval_ms.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is out of range.
    pub fn apply(&self, config: &mut ParleyConfig) -> Result<(), ConfigError> {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }
        if let Some(ref model) = self.default_model {
            config.default_model.clone_from(model);
        }
        if let Some(ref path) = self.claude_path {
            config.claude.executable.clone_from(path);
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if let Some(ms) = self.flush_interval_ms {
            config.flush_interval = Duration::from_millis(ms);
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
