//! Unified completion client

use crate::config::{ClientSettings, ModelConfig, Settings};
use crate::error::{Error, Result};
use crate::fallback::FallbackTransport;
use crate::llm_client::LlmClient;
use crate::provider::{resolve, ResolvedConfig};
use crate::responses::{ResponseOutput, ResponsesRequest};
use crate::router::{CompletionRouter, SdkCache};
use crate::sdk::OpenAiSdkFactory;
use crate::tracing_ext::{CallOutcome, CallTrace};
use crate::types::{Completion, CompletionRequest, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

/// Completion client for one configured backend
pub struct Client {
    router: CompletionRouter,
    client_type: String,
}

impl Client {
    /// Create a client for a resolved backend with its own handle cache and
    /// HTTP transport
    pub fn new(config: ResolvedConfig, settings: ClientSettings) -> Result<Self> {
        let fallback = FallbackTransport::new(settings.clone())?;
        Ok(Self::with_cache(
            config,
            settings,
            Arc::new(SdkCache::new()),
            fallback,
        ))
    }

    /// Create a client sharing SDK handles and the raw HTTP transport with
    /// other clients
    pub fn with_cache(
        config: ResolvedConfig,
        settings: ClientSettings,
        cache: Arc<SdkCache>,
        fallback: FallbackTransport,
    ) -> Self {
        Self::from_router(CompletionRouter::with_parts(
            config,
            settings,
            cache,
            Arc::new(OpenAiSdkFactory),
            fallback,
        ))
    }

    /// Create a client over an existing router
    pub fn from_router(router: CompletionRouter) -> Self {
        let client_type = router.config().kind().to_string();
        Self {
            router,
            client_type,
        }
    }

    /// Resolve a raw configuration and create a client with default settings
    pub fn from_config(raw: &ModelConfig) -> Result<Self> {
        Self::new(resolve(raw)?, ClientSettings::default())
    }

    /// Create a client from loaded settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(resolve(&settings.model)?, settings.client.clone())
    }

    /// Create a client from `LLM_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(&ModelConfig::from_env()?)
    }

    /// Get the router
    pub fn router(&self) -> &CompletionRouter {
        &self.router
    }

    /// Get the resolved configuration
    pub fn config(&self) -> &ResolvedConfig {
        self.router.config()
    }
}

#[async_trait]
impl LlmClient for Client {
    async fn get_completion(
        &self,
        messages: Vec<Message>,
        stream: bool,
        max_tokens: Option<u32>,
    ) -> Result<Completion> {
        if messages.is_empty() {
            return Err(Error::invalid_input("completion requires at least one message"));
        }

        let mut request = CompletionRequest::new(messages).with_stream(stream);
        request.max_tokens = max_tokens;

        let mut trace = CallTrace::start("completion", &self.client_type, self.config().model());
        let span = info_span!("completion", request_id = %trace.request_id, model = %trace.model);

        async {
            info!(route = ?self.router.initial_route(), stream, "Dispatching completion");
            let result = self.router.complete(&request).await;
            trace.finish(match &result {
                Ok(Completion::Response(_)) => CallOutcome::Response,
                Ok(Completion::Stream(_)) => CallOutcome::Stream,
                Err(_) => CallOutcome::Failed,
            });
            result
        }
        .instrument(span)
        .await
    }

    async fn get_response(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Value>>,
    ) -> Result<ResponseOutput> {
        let mut request = ResponsesRequest::new(self.config().wire_model(), messages);
        request.tools = tools;

        let mut trace = CallTrace::start("response", &self.client_type, self.config().model());
        let span = info_span!("response", request_id = %trace.request_id, model = %trace.model);

        async {
            let result = self.router.respond(&request).await;
            trace.finish(if result.is_ok() {
                CallOutcome::Response
            } else {
                CallOutcome::Failed
            });
            result
        }
        .instrument(span)
        .await
    }

    fn client_type(&self) -> &str {
        &self.client_type
    }

    fn endpoint(&self) -> &str {
        self.config().sdk_base_url()
    }
}
