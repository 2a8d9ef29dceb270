//! Provider resolution: backend kind, canonical model name, endpoint and credential

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use url::{Host, Url};

/// API version used for enterprise backends when none is configured
pub const DEFAULT_ENTERPRISE_API_VERSION: &str = "2025-04-01-preview";

/// Hosted API endpoint
pub const HOSTED_BASE_URL: &str = "https://api.openai.com/v1";

/// Scope requested for enterprise bearer tokens
pub const ENTERPRISE_TOKEN_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Backend kind. Determines required fields and the model namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Hosted OpenAI-compatible API
    Hosted,
    /// Identity-gated enterprise deployment (Azure OpenAI)
    Enterprise,
    /// Local OpenAI-compatible gateway (Ollama, llama.cpp, vLLM)
    LocalGateway,
    /// Any other provider, by name
    Other(String),
}

impl BackendKind {
    /// Namespace prefix of canonical model identifiers for this kind
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::LocalGateway => Some("ollama"),
            Self::Other(name) if name == "gemini" || name == "anthropic" => Some(name),
            _ => None,
        }
    }

    /// Endpoint used when no base URL is configured
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Hosted => Some(HOSTED_BASE_URL),
            Self::Other(name) if name == "gemini" => {
                Some("https://generativelanguage.googleapis.com/v1beta/openai")
            }
            Self::Other(name) if name == "anthropic" => Some("https://api.anthropic.com/v1"),
            _ => None,
        }
    }

    /// Whether a configured base URL is mandatory
    pub fn requires_base_url(&self) -> bool {
        match self {
            Self::Enterprise | Self::LocalGateway => true,
            Self::Hosted => false,
            Self::Other(_) => self.default_base_url().is_none(),
        }
    }

    /// Whether the raw `{base}/chat/completions` wire can stand in for the SDK
    pub fn supports_raw_fallback(&self) -> bool {
        !matches!(self, Self::Enterprise)
    }

    /// Prefix `model` with this kind's namespace unless already present
    pub fn qualify_model(&self, model: &str) -> String {
        match self.namespace() {
            Some(ns) if !model.starts_with(&format!("{}/", ns)) => format!("{}/{}", ns, model),
            _ => model.to_string(),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = s.trim().to_ascii_lowercase();
        match kind.as_str() {
            "" => Err(Error::config("backend kind must not be empty")),
            "openai" | "hosted" => Ok(Self::Hosted),
            "azure" | "enterprise" => Ok(Self::Enterprise),
            "ollama" | "local-gateway" | "local" => Ok(Self::LocalGateway),
            _ => Ok(Self::Other(kind)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hosted => write!(f, "hosted"),
            Self::Enterprise => write!(f, "enterprise"),
            Self::LocalGateway => write!(f, "local-gateway"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Deferred source of bearer tokens.
///
/// Any `Fn() -> Result<SecretString>` closure is a token provider.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a bearer token, possibly from a cache
    async fn bearer_token(&self) -> Result<SecretString>;

    /// Name for logging and cache keys
    fn name(&self) -> &str {
        "token-provider"
    }
}

#[async_trait]
impl<F> TokenProvider for F
where
    F: Fn() -> Result<SecretString> + Send + Sync,
{
    async fn bearer_token(&self) -> Result<SecretString> {
        (self)()
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct AzCliToken {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(default)]
    expires_on: Option<i64>,
}

/// Token provider backed by `az account get-access-token`.
///
/// Tokens are cached until five minutes before they expire.
pub struct AzureCliTokenProvider {
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl AzureCliTokenProvider {
    /// Create a provider for the given scope
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            cached: Mutex::new(None),
        }
    }

    fn cached_token(&self) -> Option<SecretString> {
        let cached = self.cached.lock();
        cached
            .as_ref()
            .filter(|c| c.expires_at - chrono::Duration::minutes(5) > Utc::now())
            .map(|c| SecretString::from(c.token.expose_secret().to_string()))
    }
}

impl Default for AzureCliTokenProvider {
    fn default() -> Self {
        Self::new(ENTERPRISE_TOKEN_SCOPE)
    }
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn bearer_token(&self) -> Result<SecretString> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let output = tokio::process::Command::new("az")
            .args(["account", "get-access-token", "--scope", self.scope.as_str(), "--output", "json"])
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::token_provider(format!(
                "az exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let parsed: AzCliToken = serde_json::from_slice(&output.stdout)?;
        let expires_at = parsed
            .expires_on
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(10));
        debug!(scope = %self.scope, %expires_at, "Acquired bearer token");

        *self.cached.lock() = Some(CachedToken {
            token: SecretString::from(parsed.access_token.clone()),
            expires_at,
        });

        Ok(SecretString::from(parsed.access_token))
    }

    fn name(&self) -> &str {
        "azure-cli"
    }
}

/// Credential attached to a resolved configuration
pub enum Credential {
    /// No credential
    None,
    /// Static API key
    ApiKey(SecretString),
    /// Bearer token fetched on each request
    TokenProvider(Arc<dyn TokenProvider>),
}

impl Credential {
    /// Stable identity used in handle cache keys
    pub fn cache_key(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::ApiKey(key) => key.expose_secret().to_string(),
            Self::TokenProvider(provider) => format!(
                "{}@{:p}",
                provider.name(),
                Arc::as_ptr(provider) as *const ()
            ),
        }
    }

    /// Static key, if any
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::ApiKey(key) => Some(key.expose_secret()),
            _ => None,
        }
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::ApiKey(key) => Self::ApiKey(SecretString::from(key.expose_secret().to_string())),
            Self::TokenProvider(provider) => Self::TokenProvider(provider.clone()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::ApiKey(_) => write!(f, "ApiKey(***REDACTED***)"),
            Self::TokenProvider(provider) => write!(f, "TokenProvider({})", provider.name()),
        }
    }
}

/// Fully resolved backend configuration. Immutable once built.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    kind: BackendKind,
    model: String,
    base_url: Option<String>,
    sdk_base_url: String,
    api_version: Option<String>,
    credential: Credential,
}

impl ResolvedConfig {
    /// Backend kind
    pub fn kind(&self) -> &BackendKind {
        &self.kind
    }

    /// Canonical model identifier, including the namespace prefix
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Model name as sent on the wire
    pub fn wire_model(&self) -> &str {
        match self.kind.namespace() {
            Some(ns) => self
                .model
                .strip_prefix(ns)
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(&self.model),
            None => &self.model,
        }
    }

    /// Configured (normalized) base URL
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Base URL the SDK path talks to
    pub fn sdk_base_url(&self) -> &str {
        &self.sdk_base_url
    }

    /// API version (always set for enterprise backends)
    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    /// Credential
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Whether the configured base URL points at the local machine
    pub fn is_loopback(&self) -> bool {
        self.base_url.as_deref().is_some_and(is_loopback_url)
    }

    /// Base URL the raw HTTP fallback may use
    pub fn fallback_base_url(&self) -> Option<&str> {
        if self.kind.supports_raw_fallback() {
            self.base_url.as_deref()
        } else {
            None
        }
    }

    /// Reasoning effort hint for reasoning-capable models
    pub fn reasoning_effort(&self) -> Option<&'static str> {
        const REASONING: [&str; 3] = ["gpt-5", "o1", "o3"];
        const OTHER_REASONING: [&str; 2] = ["claude-sonnet-4-5", "claude-opus-4"];

        let model = self.wire_model();
        let other = matches!(self.kind, BackendKind::Other(_))
            && OTHER_REASONING.iter().any(|p| model.starts_with(p));
        if REASONING.iter().any(|p| model.starts_with(p)) || other {
            Some("low")
        } else {
            None
        }
    }
}

/// Resolve a raw configuration, using the Azure CLI for enterprise tokens
pub fn resolve(raw: &ModelConfig) -> Result<ResolvedConfig> {
    resolve_with(raw, None)
}

/// Resolve a raw configuration with an explicit enterprise token provider
pub fn resolve_with(
    raw: &ModelConfig,
    token_provider: Option<Arc<dyn TokenProvider>>,
) -> Result<ResolvedConfig> {
    let raw = raw.normalized();
    let kind: BackendKind = raw.kind.parse()?;

    if raw.model.is_empty() {
        return Err(Error::config(format!("{} backend requires a model", kind)));
    }

    let base_url = raw.api_base.as_deref().map(normalize_base_url).transpose()?;
    let sdk_base_url = match (&base_url, kind.default_base_url()) {
        (Some(url), _) => url.clone(),
        (None, Some(default)) if !kind.requires_base_url() => default.to_string(),
        _ => {
            return Err(Error::config(format!(
                "{} backend requires api_base",
                kind
            )))
        }
    };

    let api_version = match kind {
        BackendKind::Enterprise => Some(
            raw.api_version
                .unwrap_or_else(|| DEFAULT_ENTERPRISE_API_VERSION.to_string()),
        ),
        _ => raw.api_version,
    };

    let credential = match (raw.api_key, &kind) {
        (Some(key), _) => Credential::ApiKey(SecretString::from(key)),
        (None, BackendKind::Enterprise) => Credential::TokenProvider(
            token_provider.unwrap_or_else(|| Arc::new(AzureCliTokenProvider::default())),
        ),
        (None, _) => Credential::None,
    };

    let model = kind.qualify_model(&raw.model);
    debug!(kind = %kind, model = %model, base_url = %sdk_base_url, "Resolved backend configuration");

    Ok(ResolvedConfig {
        kind,
        model,
        base_url,
        sdk_base_url,
        api_version,
        credential,
    })
}

/// Validate a base URL, rewrite a `localhost` host to `127.0.0.1` and strip
/// the trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| Error::config(format!("invalid api_base '{}': {}", raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::config(format!(
            "api_base '{}' must use http or https",
            raw
        )));
    }

    if url
        .host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case("localhost"))
    {
        url.set_host(Some("127.0.0.1"))
            .map_err(|e| Error::config(format!("invalid api_base '{}': {}", raw, e)))?;
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Whether `base_url` names the local machine
pub fn is_loopback_url(base_url: &str) -> bool {
    let Ok(url) = Url::parse(base_url) else {
        return false;
    };

    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
