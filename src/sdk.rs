//! Typed OpenAI-compatible SDK client
//!
//! The SDK path decodes responses into strict types and fails on any
//! malformed frame. It performs no retries of its own; the router decides
//! whether a failure is worth the raw HTTP fallback.

use crate::config::ClientSettings;
use crate::error::{json_body, Error, Result};
use crate::provider::{BackendKind, Credential, ResolvedConfig};
use crate::responses::{ResponseOutput, ResponsesRequest};
use crate::stream::{from_sdk_stream, parse_sse_line, SseLine, SseLineBuffer};
use crate::types::{Completion, CompletionChunk, CompletionResponse, Message};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Endpoint style and limits of one client, supplied with every call.
///
/// Handles are shared between clients with the same base URL and
/// credential, so anything that may differ between those clients travels
/// with the request rather than living in the handle.
#[derive(Debug, Clone, PartialEq)]
pub struct SdkEndpoint {
    /// Backend kind, selects the endpoint style
    pub kind: BackendKind,
    /// API version for enterprise endpoints
    pub api_version: Option<String>,
    /// Characters of an error body kept for diagnosis
    pub body_preview_limit: usize,
}

impl SdkEndpoint {
    /// Build the endpoint description for a resolved configuration
    pub fn from_config(config: &ResolvedConfig, settings: &ClientSettings) -> Self {
        Self {
            kind: config.kind().clone(),
            api_version: config.api_version().map(str::to_string),
            body_preview_limit: settings.body_preview_limit,
        }
    }

    fn api_version(&self) -> &str {
        self.api_version
            .as_deref()
            .unwrap_or(crate::provider::DEFAULT_ENTERPRISE_API_VERSION)
    }

    fn chat_url(&self, base_url: &str, model: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self.kind {
            BackendKind::Enterprise => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base,
                model,
                self.api_version()
            ),
            _ => format!("{}/chat/completions", base),
        }
    }

    fn responses_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self.kind {
            BackendKind::Enterprise => {
                format!("{}/openai/responses?api-version={}", base, self.api_version())
            }
            _ => format!("{}/responses", base),
        }
    }
}

/// Request as handed to the SDK path
#[derive(Debug, Clone, PartialEq)]
pub struct SdkRequest {
    /// Endpoint style of the calling client
    pub endpoint: SdkEndpoint,
    /// Wire model name
    pub model: String,
    /// Messages, passed through unchanged
    pub messages: Vec<Message>,
    /// Maximum tokens for completion
    pub max_tokens: Option<u32>,
    /// Whether to stream the response
    pub stream: bool,
    /// Reasoning effort hint
    pub reasoning_effort: Option<String>,
}

/// Transport state of an SDK handle, fixed when the handle is built
#[derive(Debug, Clone)]
pub struct SdkTarget {
    /// Base URL
    pub base_url: String,
    /// Credential
    pub credential: Credential,
    /// Connect and per-read timeout ceiling
    pub timeout: Duration,
}

impl SdkTarget {
    /// Build the target for a resolved configuration
    pub fn from_config(config: &ResolvedConfig, settings: &ClientSettings) -> Self {
        Self {
            base_url: config.sdk_base_url().to_string(),
            credential: config.credential().clone(),
            timeout: settings.request_timeout(),
        }
    }
}

/// The SDK path
#[async_trait]
pub trait ChatSdk: Send + Sync {
    /// Create a chat completion, streaming or not
    async fn create(&self, request: &SdkRequest) -> Result<Completion>;

    /// Call the Responses API
    async fn respond(
        &self,
        endpoint: &SdkEndpoint,
        request: &ResponsesRequest,
    ) -> Result<ResponseOutput>;
}

/// Constructs SDK handles for the handle cache
pub trait SdkFactory: Send + Sync {
    /// Build a handle for `target`
    fn build(&self, target: &SdkTarget) -> Result<Arc<dyn ChatSdk>>;
}

/// Factory producing [`OpenAiSdk`] handles
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiSdkFactory;

impl SdkFactory for OpenAiSdkFactory {
    fn build(&self, target: &SdkTarget) -> Result<Arc<dyn ChatSdk>> {
        Ok(Arc::new(OpenAiSdk::new(target.clone())?))
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    stream: bool,
}

/// Non-streaming chat completion body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    /// Choices
    pub choices: Vec<ChatChoice>,
}

/// Choice in a chat completion
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    /// Assistant message
    pub message: AssistantMessage,
    /// Finish reason
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Assistant message in a chat completion
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    /// Generated text
    #[serde(default)]
    pub content: Option<String>,
}

/// One streamed chat completion chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    /// Choices
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// Choice in a streamed chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    /// Incremental content
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Finish reason
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta in a streamed chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    /// Content delta
    #[serde(default)]
    pub content: Option<String>,
}

impl From<ChatCompletionChunk> for CompletionChunk {
    fn from(chunk: ChatCompletionChunk) -> Self {
        Self {
            delta_text: chunk.choices.into_iter().next().and_then(|c| c.delta.content),
        }
    }
}

impl From<ChatCompletion> for CompletionResponse {
    fn from(completion: ChatCompletion) -> Self {
        match completion.choices.into_iter().next() {
            Some(choice) => Self {
                content: choice.message.content.unwrap_or_default(),
                finish_reason: choice.finish_reason,
            },
            None => Self::default(),
        }
    }
}

/// Typed OpenAI-compatible client, one per `(base_url, credential)`
pub struct OpenAiSdk {
    client: Client,
    target: SdkTarget,
}

impl OpenAiSdk {
    /// Create a new SDK handle
    pub fn new(target: SdkTarget) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(target.timeout)
            .read_timeout(target.timeout)
            .build()?;

        Ok(Self { client, target })
    }

    /// Get the target
    pub fn target(&self) -> &SdkTarget {
        &self.target
    }

    async fn authorize(
        &self,
        endpoint: &SdkEndpoint,
        request: RequestBuilder,
    ) -> Result<RequestBuilder> {
        let credential = &self.target.credential;
        Ok(match credential {
            Credential::None => request,
            Credential::ApiKey(_) if endpoint.kind == BackendKind::Enterprise => {
                request.header("api-key", credential.api_key().unwrap_or_default())
            }
            Credential::ApiKey(_) => request.bearer_auth(credential.api_key().unwrap_or_default()),
            Credential::TokenProvider(provider) => {
                let token = provider.bearer_token().await?;
                request.bearer_auth(secrecy::ExposeSecret::expose_secret(&token))
            }
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &SdkEndpoint,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let request = self
            .authorize(endpoint, self.client.post(url).json(body))
            .await?;
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(Error::from_response(response, endpoint.body_preview_limit).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatSdk for OpenAiSdk {
    async fn create(&self, request: &SdkRequest) -> Result<Completion> {
        let endpoint = &request.endpoint;
        let url = endpoint.chat_url(&self.target.base_url, &request.model);
        debug!(url = %url, model = %request.model, stream = request.stream, "SDK chat completion");

        let body = ChatCompletionBody {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            reasoning_effort: request.reasoning_effort.as_deref(),
            stream: request.stream,
        };
        let response = self.post(endpoint, &url, &body).await?;

        if request.stream {
            return Ok(Completion::Stream(from_sdk_stream(typed_frames(
                response.bytes_stream(),
            ))));
        }

        let completion: ChatCompletion = json_body(response, endpoint.body_preview_limit).await?;
        Ok(Completion::Response(completion.into()))
    }

    async fn respond(
        &self,
        endpoint: &SdkEndpoint,
        request: &ResponsesRequest,
    ) -> Result<ResponseOutput> {
        let url = endpoint.responses_url(&self.target.base_url);
        debug!(url = %url, model = %request.model, "SDK responses call");

        let response = self.post(endpoint, &url, request).await?;
        Ok(ResponseOutput::from_body(
            json_body(response, endpoint.body_preview_limit).await?,
        ))
    }
}

/// Strictly decode SSE frames into typed chunks; a malformed frame is an error
fn typed_frames<S>(body: S) -> impl Stream<Item = Result<ChatCompletionChunk>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    stream! {
        let mut body = Box::pin(body);
        let mut lines = SseLineBuffer::new();
        let mut finished = false;

        while !finished {
            let bytes = match body.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    let failure: Result<ChatCompletionChunk> = Err(e.into());
                    yield failure;
                    break;
                }
                None => break,
            };

            lines.push(&bytes);
            while let Some(line) = lines.next_line() {
                match parse_sse_line(&line) {
                    Some(SseLine::Done) => {
                        finished = true;
                        break;
                    }
                    Some(SseLine::Data(payload)) => {
                        match serde_json::from_str::<ChatCompletionChunk>(payload) {
                            Ok(chunk) => {
                                yield Ok(chunk);
                            }
                            Err(e) => {
                                yield Err(e.into());
                                finished = true;
                                break;
                            }
                        }
                    }
                    None => {}
                }
            }
        }

        if !finished {
            if let Some(line) = lines.finish() {
                if let Some(SseLine::Data(payload)) = parse_sse_line(&line) {
                    yield serde_json::from_str::<ChatCompletionChunk>(payload).map_err(Error::from);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::provider::{resolve, resolve_with, TokenProvider};
    use crate::types::CompletionStream;
    use mockito::{Matcher, Server};
    use secrecy::SecretString;
    use serde_json::json;

    fn config(kind: &str, base_url: &str, api_key: Option<&str>) -> ResolvedConfig {
        let mut raw = ModelConfig::new(kind, "gpt-4o").with_api_base(base_url);
        raw.api_key = api_key.map(str::to_string);
        resolve(&raw).unwrap()
    }

    fn sdk(config: &ResolvedConfig) -> OpenAiSdk {
        OpenAiSdk::new(SdkTarget::from_config(config, &ClientSettings::default())).unwrap()
    }

    fn request(config: &ResolvedConfig, stream: bool) -> SdkRequest {
        SdkRequest {
            endpoint: SdkEndpoint::from_config(config, &ClientSettings::default()),
            model: "gpt-4o".to_string(),
            messages: vec![Message::user("hello")],
            max_tokens: Some(16),
            stream,
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn test_non_streaming_completion() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o",
                "max_tokens": 16,
                "stream": false
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}]}).to_string())
            .create_async()
            .await;

        let config = config("openai", &server.url(), Some("sk-test"));
        let response = sdk(&config)
            .create(&request(&config, false))
            .await
            .unwrap()
            .into_response()
            .unwrap();

        assert_eq!(response.content, "hi");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_streaming_completion() {
        let mut server = Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let config = config("openai", &server.url(), None);
        let stream: CompletionStream = sdk(&config)
            .create(&request(&config, true))
            .await
            .unwrap()
            .into_stream()
            .unwrap();
        let chunks: Vec<CompletionChunk> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(
            chunks,
            vec![
                CompletionChunk::empty(),
                CompletionChunk::text("Hel"),
                CompletionChunk::text("lo"),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_fails_sdk_stream() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: {oops\n\n")
            .create_async()
            .await;

        let config = config("openai", &server.url(), None);
        let stream = sdk(&config)
            .create(&request(&config, true))
            .await
            .unwrap()
            .into_stream()
            .unwrap();
        let items: Vec<Result<CompletionChunk>> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_error_status_carries_diagnostics() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_header("x-request-id", "req-42")
            .with_body("x".repeat(2000))
            .create_async()
            .await;

        let config = config("openai", &server.url(), None);
        match sdk(&config).create(&request(&config, false)).await.unwrap_err() {
            Error::UpstreamStatus {
                status,
                headers,
                body_preview,
            } => {
                assert_eq!(status, 503);
                assert_eq!(headers.get("x-request-id").unwrap(), "req-42");
                assert_eq!(body_preview.len(), 800);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_success_body_keeps_diagnostics() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("x-request-id", "req-8")
            .with_body("<html>sign in</html>")
            .create_async()
            .await;

        let config = config("openai", &server.url(), None);
        match sdk(&config).create(&request(&config, false)).await.unwrap_err() {
            Error::InvalidBody {
                status,
                headers,
                body_preview,
                ..
            } => {
                assert_eq!(status, 200);
                assert_eq!(headers.get("x-request-id").unwrap(), "req-8");
                assert_eq!(body_preview, "<html>sign in</html>");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enterprise_endpoint_with_api_key() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                crate::provider::DEFAULT_ENTERPRISE_API_VERSION.into(),
            ))
            .match_header("api-key", "azure-key")
            .with_status(200)
            .with_body(json!({"choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]}).to_string())
            .create_async()
            .await;

        let config = config("azure", &server.url(), Some("azure-key"));
        let response = sdk(&config)
            .create(&request(&config, false))
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert_eq!(response.content, "ok");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_shared_handle_follows_each_callers_api_version() {
        let mut server = Server::new_async().await;
        let ok = json!({"choices": [{"message": {"content": "ok"}}]}).to_string();
        let older = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::UrlEncoded("api-version".into(), "2024-10-21".into()))
            .with_status(200)
            .with_body(&ok)
            .expect(1)
            .create_async()
            .await;
        let newer = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::UrlEncoded("api-version".into(), "2025-04-01-preview".into()))
            .with_status(200)
            .with_body(&ok)
            .expect(1)
            .create_async()
            .await;

        let resolved = |version: &str| {
            resolve(
                &ModelConfig::new("azure", "gpt-4o")
                    .with_api_base(server.url())
                    .with_api_key("azure-key")
                    .with_api_version(version),
            )
            .unwrap()
        };
        let first = resolved("2024-10-21");
        let second = resolved("2025-04-01-preview");

        let shared = sdk(&first);
        shared.create(&request(&first, false)).await.unwrap();
        shared.create(&request(&second, false)).await.unwrap();

        older.assert_async().await;
        newer.assert_async().await;
    }

    #[tokio::test]
    async fn test_shared_handle_follows_each_callers_endpoint_style() {
        let mut server = Server::new_async().await;
        let ok = json!({"choices": [{"message": {"content": "ok"}}]}).to_string();
        let plain = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer shared-key")
            .with_status(200)
            .with_body(&ok)
            .expect(1)
            .create_async()
            .await;
        let deployment = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::Any)
            .match_header("api-key", "shared-key")
            .with_status(200)
            .with_body(&ok)
            .expect(1)
            .create_async()
            .await;

        let hosted = config("openai", &server.url(), Some("shared-key"));
        let enterprise = config("azure", &server.url(), Some("shared-key"));

        let shared = sdk(&hosted);
        shared.create(&request(&enterprise, false)).await.unwrap();
        shared.create(&request(&hosted, false)).await.unwrap();

        plain.assert_async().await;
        deployment.assert_async().await;
    }

    #[tokio::test]
    async fn test_enterprise_endpoint_with_token_provider() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer aad-token")
            .with_status(200)
            .with_body(json!({"choices": [{"message": {"content": "ok"}}]}).to_string())
            .create_async()
            .await;

        let provider: Arc<dyn TokenProvider> =
            Arc::new(|| -> Result<SecretString> { Ok(SecretString::from("aad-token".to_string())) });
        let raw = ModelConfig::new("azure", "gpt-4o").with_api_base(server.url());
        let config = resolve_with(&raw, Some(provider)).unwrap();

        let response = sdk(&config)
            .create(&request(&config, false))
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(response.finish_reason, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_responses_call() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/responses")
            .match_body(Matcher::PartialJson(json!({"model": "gpt-4o"})))
            .with_status(200)
            .with_body(
                json!({
                    "id": "resp_1",
                    "output": [{"type": "message", "content": [{"type": "output_text", "text": "done"}]}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let config = config("openai", &server.url(), None);
        let endpoint = SdkEndpoint::from_config(&config, &ClientSettings::default());
        let output = sdk(&config)
            .respond(
                &endpoint,
                &ResponsesRequest::new("gpt-4o", vec![Message::user("hi")]),
            )
            .await
            .unwrap();

        assert_eq!(output.id.as_deref(), Some("resp_1"));
        assert_eq!(output.output_text, "done");
        mock.assert_async().await;
    }
}
