//! Completion routing: SDK path first, one raw HTTP fallback on server errors
//!
//! ```text
//! start ── loopback base URL ──────────────▶ http fallback ──▶ done | failed
//!   └──── otherwise ──▶ sdk path ──▶ done
//!                          └── 5xx, fallback target ──▶ http fallback (once)
//!                          └── anything else ────────▶ failed
//! ```

use crate::cache::{HandleCache, HandleKey};
use crate::config::ClientSettings;
use crate::error::{Error, Result};
use crate::fallback::FallbackTransport;
use crate::provider::ResolvedConfig;
use crate::responses::{ResponseOutput, ResponsesRequest};
use crate::sdk::{ChatSdk, OpenAiSdkFactory, SdkEndpoint, SdkFactory, SdkRequest, SdkTarget};
use crate::types::{Completion, CompletionRequest};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared cache of SDK handles
pub type SdkCache = HandleCache<Arc<dyn ChatSdk>>;

/// Transport a request starts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Typed SDK client
    SdkPath,
    /// Raw HTTP against `/chat/completions`
    HttpFallback,
}

/// What an SDK failure allows the router to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Return the error to the caller
    Fatal,
    /// Retry once on the raw HTTP path
    FallbackEligible,
}

/// Classify an SDK-path error. Only server errors (5xx) may fall back.
pub fn classify(error: &Error) -> Disposition {
    match error.status() {
        Some(status) if status >= 500 => Disposition::FallbackEligible,
        _ => Disposition::Fatal,
    }
}

/// Routes completion requests for one resolved backend
pub struct CompletionRouter {
    config: ResolvedConfig,
    settings: ClientSettings,
    cache: Arc<SdkCache>,
    factory: Arc<dyn SdkFactory>,
    fallback: FallbackTransport,
}

impl CompletionRouter {
    /// Create a router with its own handle cache and the default SDK factory
    pub fn new(config: ResolvedConfig, settings: ClientSettings) -> Result<Self> {
        let fallback = FallbackTransport::new(settings.clone())?;
        Ok(Self::with_parts(
            config,
            settings,
            Arc::new(SdkCache::new()),
            Arc::new(OpenAiSdkFactory),
            fallback,
        ))
    }

    /// Create a router from explicit parts
    pub fn with_parts(
        config: ResolvedConfig,
        settings: ClientSettings,
        cache: Arc<SdkCache>,
        factory: Arc<dyn SdkFactory>,
        fallback: FallbackTransport,
    ) -> Self {
        Self {
            config,
            settings,
            cache,
            factory,
            fallback,
        }
    }

    /// Get the resolved configuration
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Get the handle cache
    pub fn cache(&self) -> &Arc<SdkCache> {
        &self.cache
    }

    /// Loopback gateways skip the SDK entirely
    pub fn initial_route(&self) -> Route {
        if self.config.is_loopback() {
            Route::HttpFallback
        } else {
            Route::SdkPath
        }
    }

    /// Cached SDK handle for this backend's `(base_url, credential)`
    pub fn sdk_handle(&self) -> Result<Arc<dyn ChatSdk>> {
        let key = HandleKey::new(
            self.config.sdk_base_url(),
            self.config.credential().cache_key(),
        );
        let target = SdkTarget::from_config(&self.config, &self.settings);

        self.cache.get_or_create(&key, || self.factory.build(&target))
    }

    /// Endpoint style and limits of this backend, sent with every SDK call
    pub fn sdk_endpoint(&self) -> SdkEndpoint {
        SdkEndpoint::from_config(&self.config, &self.settings)
    }

    /// Build the SDK request: messages pass through unchanged
    pub fn sdk_request(&self, request: &CompletionRequest) -> SdkRequest {
        SdkRequest {
            endpoint: self.sdk_endpoint(),
            model: self.config.wire_model().to_string(),
            messages: request.messages.clone(),
            max_tokens: request.max_tokens,
            stream: request.stream,
            reasoning_effort: self.config.reasoning_effort().map(str::to_string),
        }
    }

    /// Run a completion through the routing state machine
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        match self.initial_route() {
            Route::HttpFallback => {
                let base_url = self
                    .config
                    .base_url()
                    .ok_or_else(|| Error::config("loopback route without a base URL"))?;
                debug!(base_url = %base_url, "Loopback backend, using raw HTTP");
                self.fallback.send(base_url, &self.config, request).await
            }
            Route::SdkPath => {
                let sdk = self.sdk_handle()?;
                let error = match sdk.create(&self.sdk_request(request)).await {
                    Ok(completion) => return Ok(completion),
                    Err(e) => e,
                };

                match (classify(&error), self.config.fallback_base_url()) {
                    (Disposition::FallbackEligible, Some(base_url)) => {
                        warn!(
                            error = %error,
                            base_url = %base_url,
                            "SDK call failed with a server error, retrying once over raw HTTP"
                        );
                        self.fallback.send(base_url, &self.config, request).await
                    }
                    _ => Err(error),
                }
            }
        }
    }

    /// Call the Responses API on the SDK path. There is no raw fallback.
    pub async fn respond(&self, request: &ResponsesRequest) -> Result<ResponseOutput> {
        self.sdk_handle()?
            .respond(&self.sdk_endpoint(), request)
            .await
    }
}
