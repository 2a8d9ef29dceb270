//! Configuration surface and settings loading

use crate::error::{Error, Result};
use config::{Config, Environment, File};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides of [`Settings`]
pub const ENV_PREFIX: &str = "UNIFIED_COMPLETION";

/// Raw model configuration as handed over by the configuration loader.
///
/// Every field is a string; [`crate::provider::resolve`] turns it into a
/// validated backend configuration.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend kind (`openai`, `azure`, `ollama`, `gemini`, ...)
    #[serde(alias = "endpoint")]
    pub kind: String,
    /// Model or deployment name
    pub model: String,
    /// Static API key
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL of the backend
    #[serde(default, alias = "base_url")]
    pub api_base: Option<String>,
    /// API version (enterprise backends)
    #[serde(default)]
    pub api_version: Option<String>,
}

impl ModelConfig {
    /// Create a new model configuration
    pub fn new(kind: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Load from `LLM_*` environment variables, reading `.env` first
    pub fn from_env() -> Result<Self> {
        // Load .env if present so local development picks up LLM_API_KEY
        let _ = dotenv();

        let kind = std::env::var("LLM_ENDPOINT").unwrap_or_else(|_| "openai".to_string());
        let model = std::env::var("LLM_MODEL")
            .map_err(|_| Error::config("LLM_MODEL environment variable not set"))?;

        Ok(Self {
            kind,
            model,
            api_key: std::env::var("LLM_API_KEY").ok(),
            api_base: std::env::var("LLM_API_BASE").ok(),
            api_version: std::env::var("LLM_API_VERSION").ok(),
        }
        .normalized())
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Set the API version
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Trim every field and treat empty optional fields as absent
    pub fn normalized(&self) -> Self {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Self {
            kind: self.kind.trim().to_string(),
            model: self.model.trim().to_string(),
            api_key: clean(&self.api_key),
            api_base: clean(&self.api_base),
            api_version: clean(&self.api_version),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .field("api_base", &self.api_base)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Transport limits shared by the SDK and fallback paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Connect and per-read timeout ceiling in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Characters of an error body kept for diagnosis
    #[serde(default = "default_body_preview_limit")]
    pub body_preview_limit: usize,
    /// `max_tokens` sent on streaming fallback calls when the caller gave none
    #[serde(default = "default_fallback_max_tokens_stream")]
    pub fallback_max_tokens_stream: u32,
    /// `max_tokens` sent on non-streaming fallback calls when the caller gave none
    #[serde(default = "default_fallback_max_tokens")]
    pub fallback_max_tokens: u32,
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_body_preview_limit() -> usize {
    crate::error::DEFAULT_BODY_PREVIEW_LIMIT
}

fn default_fallback_max_tokens_stream() -> u32 {
    512
}

fn default_fallback_max_tokens() -> u32 {
    64
}

impl ClientSettings {
    /// Timeout ceiling as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Set the timeout ceiling
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// `max_tokens` for a fallback request
    pub fn fallback_max_tokens(&self, requested: Option<u32>, stream: bool) -> u32 {
        match requested {
            Some(max_tokens) => max_tokens,
            None if stream => self.fallback_max_tokens_stream,
            None => self.fallback_max_tokens,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            body_preview_limit: default_body_preview_limit(),
            fallback_max_tokens_stream: default_fallback_max_tokens_stream(),
            fallback_max_tokens: default_fallback_max_tokens(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Root settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Backend model configuration
    pub model: ModelConfig,
    /// Transport limits
    #[serde(default)]
    pub client: ClientSettings,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from an optional file plus `UNIFIED_COMPLETION__*` overrides
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let _ = dotenv();

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_ref()).required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::config(format!("Failed to load settings: {}", e)))?;

        let mut settings: Settings = config
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to parse settings: {}", e)))?;
        settings.model = settings.model.normalized();

        Ok(settings)
    }
}
