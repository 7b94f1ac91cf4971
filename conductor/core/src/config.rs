//! Conductor Configuration
//!
//! Settings for the session controller, the streaming pipeline and the
//! optional LLM chat skill, loaded from `$XDG_CONFIG_HOME/parley/parley.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables (`PARLEY_*`, plus `OLLAMA_HOST`/`OLLAMA_PORT`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! merge_request_threshold_secs = 2.0
//! state_timeout_secs = 300
//! data_dir = "/var/lib/parley"
//!
//! [pipeline]
//! parse_interval_ms = 50
//! split_chars = [".", "!", "?", "。"]
//! max_length_before_optional_split = 50
//!
//! [chat]
//! enabled = true
//! model = "llama3.2"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

/// Where the effective configuration was last changed from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in defaults
    #[default]
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
// Effective Configuration
// =============================================================================

/// Streaming pipeline settings
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// How often the parse task looks at the generation buffer
    pub parse_interval_ms: u64,
    /// Characters that end a segment
    pub split_chars: Vec<char>,
    /// Characters that end a segment once it is long enough
    pub optional_split_chars: Vec<char>,
    /// Segment length (in chars) after which optional split chars apply
    pub max_length_before_optional_split: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parse_interval_ms: 50,
            split_chars: vec!['.', '!', '?', '。', '！', '？'],
            optional_split_chars: vec![',', ';', ':', '、', '，'],
            max_length_before_optional_split: 50,
        }
    }
}

impl PipelineConfig {
    /// Parse interval as a duration
    #[must_use]
    pub fn parse_interval(&self) -> Duration {
        Duration::from_millis(self.parse_interval_ms.max(1))
    }
}

/// LLM chat skill settings
#[derive(Clone, Debug, PartialEq)]
pub struct ChatConfig {
    /// Whether the chat skill is registered
    pub enabled: bool,
    /// Topic name the chat skill answers to
    pub topic: String,
    /// Model identifier passed to the backend
    pub model: String,
    /// Ollama host
    pub host: String,
    /// Ollama port
    pub port: u16,
    /// System prompt prepended to every exchange
    pub system_prompt: Option<String>,
    /// Messages kept in per-user history
    pub max_history_messages: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: "chat".to_string(),
            model: "llama3.2".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            system_prompt: None,
            max_history_messages: 20,
        }
    }
}

/// Session controller settings
#[derive(Clone, Debug, PartialEq)]
pub struct ConductorConfig {
    /// Requests closer together than this are merged (0 disables)
    pub merge_request_threshold_secs: f64,
    /// Marker placed before a merged request body
    pub merge_request_prefix: String,
    /// Seconds after which a saved state is considered stale
    pub state_timeout_secs: u64,
    /// Upper bound for one voice capture, forwarded to request providers
    pub max_recording_duration_secs: f64,
    /// How long `stop_dialog(wait)` waits for the dialog to go idle
    pub stop_wait_timeout_ms: u64,
    /// Directory for the JSON-file stores; in-memory stores when unset
    pub data_dir: Option<PathBuf>,
    /// Streaming pipeline settings
    pub pipeline: PipelineConfig,
    /// LLM chat skill settings
    pub chat: ChatConfig,
    /// Where the configuration was last changed from
    pub source: ConfigSource,
    /// Config file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
}

/// Default marker placed before a merged request body
pub const DEFAULT_MERGE_REQUEST_PREFIX: &str =
    "The previous request was cut off before it was answered. Respond to the combined request below:";

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            merge_request_threshold_secs: 2.0,
            merge_request_prefix: DEFAULT_MERGE_REQUEST_PREFIX.to_string(),
            state_timeout_secs: 300,
            max_recording_duration_secs: 20.0,
            stop_wait_timeout_ms: 1000,
            data_dir: None,
            pipeline: PipelineConfig::default(),
            chat: ChatConfig::default(),
            source: ConfigSource::Default,
            config_file_path: None,
        }
    }
}

impl ConductorConfig {
    /// Defaults overlaid with environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        apply_env_config(&mut config, |key| std::env::var(key).ok());
        config
    }

    /// Merge window, `None` when merging is disabled
    #[must_use]
    pub fn merge_threshold(&self) -> Option<Duration> {
        (self.merge_request_threshold_secs > 0.0)
            .then(|| Duration::from_secs_f64(self.merge_request_threshold_secs))
    }

    /// Bound for `stop_dialog(wait)`
    #[must_use]
    pub fn stop_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_wait_timeout_ms)
    }

    /// Maximum voice capture length
    #[must_use]
    pub fn max_recording_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_recording_duration_secs.max(0.0))
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.merge_request_threshold_secs.is_finite() || self.merge_request_threshold_secs < 0.0
        {
            return Err(ConfigError::ValidationError(format!(
                "merge_request_threshold_secs must be >= 0, got {}",
                self.merge_request_threshold_secs
            )));
        }
        if !self.max_recording_duration_secs.is_finite() || self.max_recording_duration_secs <= 0.0
        {
            return Err(ConfigError::ValidationError(format!(
                "max_recording_duration_secs must be > 0, got {}",
                self.max_recording_duration_secs
            )));
        }
        if self.pipeline.parse_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.parse_interval_ms must be > 0".to_string(),
            ));
        }
        if self.pipeline.split_chars.is_empty() {
            return Err(ConfigError::ValidationError(
                "pipeline.split_chars must not be empty".to_string(),
            ));
        }
        if self.chat.enabled && self.chat.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "chat.model must be set when chat is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Pipeline section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineToml {
    /// Parse interval in milliseconds
    pub parse_interval_ms: Option<u64>,
    /// Segment terminators
    pub split_chars: Option<Vec<char>>,
    /// Length-gated segment terminators
    pub optional_split_chars: Option<Vec<char>>,
    /// Length after which optional terminators apply
    pub max_length_before_optional_split: Option<usize>,
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Register the chat skill
    pub enabled: Option<bool>,
    /// Chat topic name
    pub topic: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// Ollama host
    pub host: Option<String>,
    /// Ollama port
    pub port: Option<u16>,
    /// System prompt
    pub system_prompt: Option<String>,
    /// History length
    pub max_history_messages: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Merge window in seconds
    pub merge_request_threshold_secs: Option<f64>,
    /// Merge marker text
    pub merge_request_prefix: Option<String>,
    /// State staleness timeout in seconds
    pub state_timeout_secs: Option<u64>,
    /// Voice capture bound in seconds
    pub max_recording_duration_secs: Option<f64>,
    /// Stop wait bound in milliseconds
    pub stop_wait_timeout_ms: Option<u64>,
    /// Store directory
    pub data_dir: Option<PathBuf>,
    /// Pipeline section
    pub pipeline: PipelineToml,
    /// Chat section
    pub chat: ChatToml,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/parley/parley.toml` or
/// `~/.config/parley/parley.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("parley").join("parley.toml"))
}

/// Load configuration from the default path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or a
/// value is out of range. A missing config file is not an error.
pub fn load_config() -> Result<ConductorConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or a value is out
/// of range.
pub fn load_config_from_path(path: Option<&Path>) -> Result<ConductorConfig, ConfigError> {
    let mut config = ConductorConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;
            let toml_config: ConductorToml = toml::from_str(&content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.to_path_buf());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
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

/// Apply TOML values over `config`
pub fn apply_toml_config(config: &mut ConductorConfig, toml: &ConductorToml) {
    if let Some(v) = toml.merge_request_threshold_secs {
        config.merge_request_threshold_secs = v;
    }
    if let Some(v) = &toml.merge_request_prefix {
        config.merge_request_prefix.clone_from(v);
    }
    if let Some(v) = toml.state_timeout_secs {
        config.state_timeout_secs = v;
    }
    if let Some(v) = toml.max_recording_duration_secs {
        config.max_recording_duration_secs = v;
    }
    if let Some(v) = toml.stop_wait_timeout_ms {
        config.stop_wait_timeout_ms = v;
    }
    if let Some(v) = &toml.data_dir {
        config.data_dir = Some(v.clone());
    }

    let pipeline = &toml.pipeline;
    if let Some(v) = pipeline.parse_interval_ms {
        config.pipeline.parse_interval_ms = v;
    }
    if let Some(v) = &pipeline.split_chars {
        config.pipeline.split_chars.clone_from(v);
    }
    if let Some(v) = &pipeline.optional_split_chars {
        config.pipeline.optional_split_chars.clone_from(v);
    }
    if let Some(v) = pipeline.max_length_before_optional_split {
        config.pipeline.max_length_before_optional_split = v;
    }

    let chat = &toml.chat;
    if let Some(v) = chat.enabled {
        config.chat.enabled = v;
    }
    if let Some(v) = &chat.topic {
        config.chat.topic.clone_from(v);
    }
    if let Some(v) = &chat.model {
        config.chat.model.clone_from(v);
    }
    if let Some(v) = &chat.host {
        config.chat.host.clone_from(v);
    }
    if let Some(v) = chat.port {
        config.chat.port = v;
    }
    if let Some(v) = &chat.system_prompt {
        config.chat.system_prompt = Some(v.clone());
    }
    if let Some(v) = chat.max_history_messages {
        config.chat.max_history_messages = v;
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key = %key, value = %raw, "Ignoring unparsable environment value");
    }
    parsed
}

/// Apply environment values over `config`
///
/// `lookup` resolves a variable name; pass `|k| std::env::var(k).ok()` for the
/// process environment.
pub fn apply_env_config(config: &mut ConductorConfig, lookup: impl Fn(&str) -> Option<String>) {
    let mut changed = false;
    let mut var = |key: &str| {
        let value = lookup(key);
        changed |= value.is_some();
        value
    };

    if let Some(v) = var("PARLEY_MERGE_THRESHOLD_SECS") {
        if let Some(v) = parse_env("PARLEY_MERGE_THRESHOLD_SECS", &v) {
            config.merge_request_threshold_secs = v;
        }
    }
    if let Some(v) = var("PARLEY_MERGE_PREFIX") {
        config.merge_request_prefix = v;
    }
    if let Some(v) = var("PARLEY_STATE_TIMEOUT_SECS") {
        if let Some(v) = parse_env("PARLEY_STATE_TIMEOUT_SECS", &v) {
            config.state_timeout_secs = v;
        }
    }
    if let Some(v) = var("PARLEY_MAX_RECORDING_SECS") {
        if let Some(v) = parse_env("PARLEY_MAX_RECORDING_SECS", &v) {
            config.max_recording_duration_secs = v;
        }
    }
    if let Some(v) = var("PARLEY_STOP_WAIT_MS") {
        if let Some(v) = parse_env("PARLEY_STOP_WAIT_MS", &v) {
            config.stop_wait_timeout_ms = v;
        }
    }
    if let Some(v) = var("PARLEY_DATA_DIR") {
        config.data_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = var("PARLEY_PARSE_INTERVAL_MS") {
        if let Some(v) = parse_env("PARLEY_PARSE_INTERVAL_MS", &v) {
            config.pipeline.parse_interval_ms = v;
        }
    }
    if let Some(v) = var("PARLEY_CHAT") {
        config.chat.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Some(v) = var("PARLEY_CHAT_MODEL") {
        config.chat.model = v;
    }
    if let Some(v) = var("PARLEY_SYSTEM_PROMPT") {
        config.chat.system_prompt = Some(v);
    }
    if let Some(v) = var("OLLAMA_HOST") {
        config.chat.host = v;
    }
    if let Some(v) = var("OLLAMA_PORT") {
        if let Some(v) = parse_env("OLLAMA_PORT", &v) {
            config.chat.port = v;
        }
    }

    if changed {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Merge window override
    pub merge_request_threshold_secs: Option<f64>,
    /// State timeout override
    pub state_timeout_secs: Option<u64>,
    /// Store directory override
    pub data_dir: Option<PathBuf>,
    /// Parse interval override
    pub parse_interval_ms: Option<u64>,
    /// Chat enable override
    pub chat_enabled: Option<bool>,
    /// Chat model override
    pub chat_model: Option<String>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ConductorConfig) {
        let mut changed = false;

        if let Some(v) = self.merge_request_threshold_secs {
            config.merge_request_threshold_secs = v;
            changed = true;
        }
        if let Some(v) = self.state_timeout_secs {
            config.state_timeout_secs = v;
            changed = true;
        }
        if let Some(v) = &self.data_dir {
            config.data_dir = Some(v.clone());
            changed = true;
        }
        if let Some(v) = self.parse_interval_ms {
            config.pipeline.parse_interval_ms = v;
            changed = true;
        }
        if let Some(v) = self.chat_enabled {
            config.chat.enabled = v;
            changed = true;
        }
        if let Some(v) = &self.chat_model {
            config.chat.model.clone_from(v);
            changed = true;
        }

        if changed {
            config.source = ConfigSource::Cli;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ConductorConfig::default();
        assert_eq!(config.merge_threshold(), Some(Duration::from_secs(2)));
        assert_eq!(config.state_timeout_secs, 300);
        assert_eq!(config.stop_wait_timeout(), Duration::from_secs(1));
        assert_eq!(config.pipeline.parse_interval(), Duration::from_millis(50));
        assert_eq!(config.source, ConfigSource::Default);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_threshold_disables_merge() {
        let config = ConductorConfig {
            merge_request_threshold_secs: 0.0,
            ..Default::default()
        };
        assert_eq!(config.merge_threshold(), None);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let toml: ConductorToml = toml::from_str(
            r#"
            state_timeout_secs = 60

            [pipeline]
            parse_interval_ms = 20
            split_chars = [".", "。"]

            [chat]
            enabled = true
            model = "mistral"
            "#,
        )
        .unwrap();

        let mut config = ConductorConfig::default();
        apply_toml_config(&mut config, &toml);

        assert_eq!(config.state_timeout_secs, 60);
        assert_eq!(config.pipeline.parse_interval_ms, 20);
        assert_eq!(config.pipeline.split_chars, vec!['.', '。']);
        assert!(config.chat.enabled);
        assert_eq!(config.chat.model, "mistral");
        assert_eq!(config.chat.port, 11434);
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("PARLEY_MERGE_THRESHOLD_SECS", "0.5"),
            ("PARLEY_STATE_TIMEOUT_SECS", "not-a-number"),
            ("OLLAMA_PORT", "8080"),
        ]
        .into_iter()
        .collect();

        let mut config = ConductorConfig {
            state_timeout_secs: 42,
            ..Default::default()
        };
        apply_env_config(&mut config, |k| env.get(k).map(ToString::to_string));

        assert!((config.merge_request_threshold_secs - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.state_timeout_secs, 42);
        assert_eq!(config.chat.port, 8080);
        assert_eq!(config.source, ConfigSource::Env);
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = ConductorConfig::default();
        ConfigOverrides {
            chat_enabled: Some(true),
            ..ConfigOverrides::new()
        }
        .apply(&mut config);
        assert!(config.chat.enabled);
        assert_eq!(config.source, ConfigSource::Cli);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "stop_wait_timeout_ms = 250\n").unwrap();

        let config = load_config_from_path(Some(&path)).unwrap();
        assert_eq!(config.stop_wait_timeout_ms, 250);
        assert_eq!(config.config_file_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "state_timeout_secs = \"soon\"\n").unwrap();

        let err = load_config_from_path(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_rejects_negative_threshold() {
        let config = ConductorConfig {
            merge_request_threshold_secs: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
