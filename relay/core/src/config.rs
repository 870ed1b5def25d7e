//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, from a TOML file at
//! `~/.config/relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the daemon through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! API keys are never read from the file; backends take them from
//! `OPENAI_API_KEY` and `ANTHROPIC_API_KEY`.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! addr = "0.0.0.0:9042"
//! long_poll_timeout_secs = 30
//! max_body_bytes = 32768
//!
//! [broker]
//! keep_min = 50
//! max_age_secs = 3600
//! sweep_interval_secs = 60
//!
//! [batching]
//! max_fragments = 10
//! max_delay_ms = 5000
//! queue_capacity = 16
//!
//! [generation]
//! history_limit = 50
//! system_prompt = "You are a helpful assistant."
//! default_model = "gpt-5-nano"
//!
//! [providers]
//! ollama_host = "localhost"
//! ollama_port = 11434
//! ollama_models = ["llama3.2"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::RetentionPolicy;
use crate::models::ModelRegistry;
use crate::streaming::{BatchConfig, RelaySettings};

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

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address
    pub addr: Option<String>,
    /// Long-poll wait before the timeout sentinel, in seconds
    pub long_poll_timeout_secs: Option<u64>,
    /// Largest accepted `/ask` body
    pub max_body_bytes: Option<usize>,
}

/// `[broker]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerToml {
    /// Retention floor per channel
    pub keep_min: Option<usize>,
    /// Retention age window, in seconds
    pub max_age_secs: Option<u64>,
    /// Period of the background retention sweep, in seconds
    pub sweep_interval_secs: Option<u64>,
}

/// `[batching]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingToml {
    /// Count trigger
    pub max_fragments: Option<usize>,
    /// Time trigger, in milliseconds
    pub max_delay_ms: Option<u64>,
    /// Producer/consumer queue capacity
    pub queue_capacity: Option<usize>,
}

/// `[generation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Stored entries fed back as conversation history
    pub history_limit: Option<usize>,
    /// System prompt for every conversation
    pub system_prompt: Option<String>,
    /// Model used when a request names none
    pub default_model: Option<String>,
}

/// `[providers]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersToml {
    /// OpenAI-compatible API root
    pub openai_base_url: Option<String>,
    /// Anthropic API root
    pub anthropic_base_url: Option<String>,
    /// Ollama host
    pub ollama_host: Option<String>,
    /// Ollama port
    pub ollama_port: Option<u16>,
    /// Models served by Ollama
    pub ollama_models: Option<Vec<String>>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Server section
    pub server: ServerToml,
    /// Broker section
    pub broker: BrokerToml,
    /// Batching section
    pub batching: BatchingToml,
    /// Generation section
    pub generation: GenerationToml,
    /// Providers section
    pub providers: ProvidersToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved relay configuration
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Listen address
    pub addr: String,
    /// Long-poll wait before the timeout sentinel
    pub long_poll_timeout: Duration,
    /// Largest accepted `/ask` body
    pub max_body_bytes: usize,
    /// Channel log retention
    pub retention: RetentionPolicy,
    /// Period of the background retention sweep
    pub sweep_interval: Duration,
    /// Batch triggers
    pub batch: BatchConfig,
    /// Producer/consumer queue capacity
    pub queue_capacity: usize,
    /// Stored entries fed back as conversation history
    pub history_limit: usize,
    /// System prompt for every conversation
    pub system_prompt: Option<String>,
    /// Model used when a request names none
    pub default_model: Option<String>,
    /// OpenAI-compatible API root override
    pub openai_base_url: Option<String>,
    /// Anthropic API root override
    pub anthropic_base_url: Option<String>,
    /// Ollama host
    pub ollama_host: String,
    /// Ollama port
    pub ollama_port: u16,
    /// Models served by Ollama; empty disables the Ollama backend
    pub ollama_models: Vec<String>,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:9042".to_string(),
            long_poll_timeout: Duration::from_secs(30),
            max_body_bytes: 32 * 1024,
            retention: RetentionPolicy::default(),
            sweep_interval: Duration::from_secs(60),
            batch: BatchConfig::default(),
            queue_capacity: 16,
            history_limit: 50,
            system_prompt: None,
            default_model: None,
            openai_base_url: None,
            anthropic_base_url: None,
            ollama_host: "localhost".to_string(),
            ollama_port: 11434,
            ollama_models: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority layer that set a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Generation settings for the relay
    #[must_use]
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            batch: self.batch,
            queue_capacity: self.queue_capacity,
            history_limit: self.history_limit,
            system_prompt: self.system_prompt.clone(),
        }
    }

    /// Built-in models plus the configured Ollama models and default
    #[must_use]
    pub fn model_registry(&self) -> ModelRegistry {
        ModelRegistry::builtin()
            .with_ollama_models(self.ollama_models.iter().cloned())
            .with_default_model(self.default_model.clone())
    }

    /// Reject values the relay cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(ConfigError::ValidationError("addr cannot be empty".into()));
        }
        if self.long_poll_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "long_poll_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_body_bytes must be greater than 0".into(),
            ));
        }
        if self.batch.max_fragments == 0 {
            return Err(ConfigError::ValidationError(
                "max_fragments must be greater than 0".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue_capacity must be greater than 0".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/relay/relay.toml` or
/// `~/.config/relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("relay").join("relay.toml"))
}

/// Load configuration from the default path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
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

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) {
    // Server
    if let Some(ref addr) = toml.server.addr {
        config.addr.clone_from(addr);
    }
    if let Some(secs) = toml.server.long_poll_timeout_secs {
        config.long_poll_timeout = Duration::from_secs(secs);
    }
    if let Some(bytes) = toml.server.max_body_bytes {
        config.max_body_bytes = bytes;
    }

    // Broker
    if let Some(keep_min) = toml.broker.keep_min {
        config.retention.keep_min = keep_min;
    }
    if let Some(secs) = toml.broker.max_age_secs {
        config.retention.max_age = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.broker.sweep_interval_secs {
        config.sweep_interval = Duration::from_secs(secs);
    }

    // Batching
    if let Some(n) = toml.batching.max_fragments {
        config.batch.max_fragments = n;
    }
    if let Some(ms) = toml.batching.max_delay_ms {
        config.batch.max_delay = Duration::from_millis(ms);
    }
    if let Some(capacity) = toml.batching.queue_capacity {
        config.queue_capacity = capacity;
    }

    // Generation
    if let Some(limit) = toml.generation.history_limit {
        config.history_limit = limit;
    }
    if toml.generation.system_prompt.is_some() {
        config.system_prompt.clone_from(&toml.generation.system_prompt);
    }
    if toml.generation.default_model.is_some() {
        config.default_model.clone_from(&toml.generation.default_model);
    }

    // Providers
    if toml.providers.openai_base_url.is_some() {
        config.openai_base_url.clone_from(&toml.providers.openai_base_url);
    }
    if toml.providers.anthropic_base_url.is_some() {
        config
            .anthropic_base_url
            .clone_from(&toml.providers.anthropic_base_url);
    }
    if let Some(ref host) = toml.providers.ollama_host {
        config.ollama_host.clone_from(host);
    }
    if let Some(port) = toml.providers.ollama_port {
        config.ollama_port = port;
    }
    if let Some(ref models) = toml.providers.ollama_models {
        config.ollama_models.clone_from(models);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut RelayConfig, env: impl Fn(&str) -> Option<String>) {
    let parsed = |key: &str| env(key).and_then(|v| v.trim().parse::<u64>().ok());

    if let Some(addr) = env("RELAY_ADDR").filter(|a| !a.is_empty()) {
        config.addr = addr;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parsed("RELAY_LONG_POLL_TIMEOUT") {
        config.long_poll_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(n) = env("RELAY_KEEP_MIN").and_then(|v| v.trim().parse::<usize>().ok()) {
        config.retention.keep_min = n;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parsed("RELAY_MAX_AGE") {
        config.retention.max_age = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(n) = env("RELAY_BATCH_SIZE").and_then(|v| v.trim().parse::<usize>().ok()) {
        config.batch.max_fragments = n;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed("RELAY_BATCH_DELAY_MS") {
        config.batch.max_delay = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("RELAY_DEFAULT_MODEL") {
        config.default_model = Some(model).filter(|m| !m.is_empty());
        config.source = ConfigSource::Env;
    }
    if let Some(models) = env("RELAY_OLLAMA_MODELS") {
        config.ollama_models = models
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect();
        config.source = ConfigSource::Env;
    }
    if let Some(host) = env("OLLAMA_HOST").filter(|h| !h.is_empty()) {
        config.ollama_host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("OLLAMA_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        config.ollama_port = port;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub addr: Option<String>,
    /// Long-poll timeout override (seconds)
    pub long_poll_timeout_secs: Option<u64>,
    /// Retention floor override
    pub keep_min: Option<usize>,
    /// Retention age override (seconds)
    pub max_age_secs: Option<u64>,
    /// Default model override
    pub default_model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Set long-poll timeout override
    #[must_use]
    pub fn with_long_poll_timeout_secs(mut self, secs: u64) -> Self {
        self.long_poll_timeout_secs = Some(secs);
        self
    }

    /// Set retention floor override
    #[must_use]
    pub fn with_keep_min(mut self, keep_min: usize) -> Self {
        self.keep_min = Some(keep_min);
        self
    }

    /// Set retention age override
    #[must_use]
    pub fn with_max_age_secs(mut self, secs: u64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.addr.is_none()
            && self.long_poll_timeout_secs.is_none()
            && self.keep_min.is_none()
            && self.max_age_secs.is_none()
            && self.default_model.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref addr) = self.addr {
            config.addr.clone_from(addr);
        }
        if let Some(secs) = self.long_poll_timeout_secs {
            config.long_poll_timeout = Duration::from_secs(secs);
        }
        if let Some(keep_min) = self.keep_min {
            config.retention.keep_min = keep_min;
        }
        if let Some(secs) = self.max_age_secs {
            config.retention.max_age = Duration::from_secs(secs);
        }
        if let Some(ref model) = self.default_model {
            config.default_model = Some(model.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
