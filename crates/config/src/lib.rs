//! Configuration loading, validation, and management for turnledger.
//!
//! Loads configuration from `~/.turnledger/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use turnledger_core::{Ledger, LedgerError};

/// The root configuration structure.
///
/// Maps directly to `~/.turnledger/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default text-generation provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per reply
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Conversation window settings
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Interactive chat settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "groq".into()
}
fn default_model() -> String {
    "llama-3.1-8b-instant".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("ledger", &self.ledger)
            .field("chat", &self.chat)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Bounds of the conversation kept for each chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Maximum user/assistant turns retained
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// System directive placed at the front of every transcript.
    /// An empty string disables it.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_max_turns() -> usize {
    4
}
fn default_system_prompt() -> String {
    "You are a helpful and friendly assistant.".into()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl LedgerConfig {
    /// The system directive, or `None` when disabled.
    pub fn system_text(&self) -> Option<&str> {
        let text = self.system_prompt.trim();
        (!text.is_empty()).then_some(text)
    }

    /// Build a fresh ledger from these settings.
    pub fn build(&self) -> Result<Ledger, LedgerError> {
        Ledger::create(self.system_text(), self.max_turns)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Print replies as they stream in
    #[serde(default)]
    pub stream: bool,

    /// Transcript file loaded at start and saved after every turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<PathBuf>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default location, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        config.apply_env(|key| std::env::var(key).ok())?;
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
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Recognised variables: `TURNLEDGER_PROVIDER`, `TURNLEDGER_MODEL`,
    /// `TURNLEDGER_MAX_TURNS`, and for the API key (only when none is
    /// configured) the selected provider's own variable (`GROQ_API_KEY`,
    /// `OPENAI_API_KEY`) falling back to `TURNLEDGER_API_KEY`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("TURNLEDGER_PROVIDER") {
            self.default_provider = provider;
        }

        // A key is only ever sent to the vendor it was issued for.
        if self.api_key.is_none() {
            self.api_key = vendor_key_var(&self.default_provider)
                .and_then(|var| lookup(var))
                .filter(|key| !key.trim().is_empty())
                .or_else(|| lookup("TURNLEDGER_API_KEY"))
                .filter(|key| !key.trim().is_empty());
        }

        if let Some(model) = lookup("TURNLEDGER_MODEL") {
            self.default_model = model;
        }

        if let Some(raw) = lookup("TURNLEDGER_MAX_TURNS") {
            self.ledger.max_turns = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "TURNLEDGER_MAX_TURNS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        Ok(())
    }

    /// Get the config directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".turnledger")
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Default location for saved transcripts.
    pub fn transcripts_dir() -> PathBuf {
        Self::config_dir().join("transcripts")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.ledger.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "ledger.max_turns must be at least 1".into(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_model must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// A copy safe to print: every API key replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        let marker = || Some("[REDACTED]".to_string());
        if config.api_key.is_some() {
            config.api_key = marker();
        }
        for provider in config.providers.values_mut() {
            if provider.api_key.is_some() {
                provider.api_key = marker();
            }
        }
        config
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// The vendor-specific API key variable for `provider`, if it has one.
fn vendor_key_var(provider: &str) -> Option<&'static str> {
    match provider {
        "groq" => Some("GROQ_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        _ => None,
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            ledger: LedgerConfig::default(),
            chat: ChatConfig::default(),
            providers: HashMap::new(),
        }
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
