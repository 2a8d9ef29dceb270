//! Raw HTTP fallback against an OpenAI-compatible `/chat/completions` endpoint
//!
//! Used directly for loopback gateways and as the single fallback attempt
//! after an SDK server error. Decoding here is lenient: malformed stream
//! frames are skipped rather than failing the request.

use crate::config::ClientSettings;
use crate::error::{json_body, Error, Result};
use crate::provider::{Credential, ResolvedConfig};
use crate::sanitize::sanitize_messages;
use crate::stream::{response_from_body, sse_chunks};
use crate::types::{Completion, CompletionRequest, Message};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct FallbackBody<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

/// HTTP transport for the fallback path
#[derive(Debug, Clone)]
pub struct FallbackTransport {
    http: Client,
    settings: ClientSettings,
}

impl FallbackTransport {
    /// Create a transport with the configured timeouts
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(settings.request_timeout())
            .read_timeout(settings.request_timeout())
            .no_proxy()
            .build()?;

        Ok(Self { http, settings })
    }

    /// Create a transport over a preconfigured HTTP client
    pub fn with_client(http: Client, settings: ClientSettings) -> Self {
        Self { http, settings }
    }

    /// Get the settings
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Send `request` to `{base_url}/chat/completions`.
    ///
    /// Messages are sanitized to plain text and `max_tokens` is always sent.
    /// A bearer header is attached for a static key or a token provider, and
    /// omitted when the backend has no credential.
    pub async fn send(
        &self,
        base_url: &str,
        config: &ResolvedConfig,
        request: &CompletionRequest,
    ) -> Result<Completion> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let body = FallbackBody {
            model: config.wire_model(),
            messages: sanitize_messages(&request.messages),
            max_tokens: self
                .settings
                .fallback_max_tokens(request.max_tokens, request.stream),
            stream: request.stream,
        };

        info!(url = %url, model = %body.model, stream = body.stream, "Sending raw HTTP completion");

        let mut builder = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&body);
        match config.credential() {
            Credential::None => {}
            Credential::ApiKey(_) => {
                builder = builder.bearer_auth(config.credential().api_key().unwrap_or_default());
            }
            Credential::TokenProvider(provider) => {
                let token = provider.bearer_token().await?;
                builder = builder.bearer_auth(token.expose_secret());
            }
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(Error::from_response(response, self.settings.body_preview_limit).await);
        }

        if request.stream {
            return Ok(Completion::Stream(sse_chunks(response.bytes_stream())));
        }

        let value: Value = json_body(response, self.settings.body_preview_limit).await?;
        debug!("Raw HTTP completion received");

        Ok(Completion::Response(response_from_body(&value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::provider::{resolve, resolve_with, TokenProvider};
    use crate::types::{ContentPart, CompletionChunk};
    use futures::StreamExt;
    use mockito::{Matcher, Server};
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn transport() -> FallbackTransport {
        FallbackTransport::new(ClientSettings::default()).unwrap()
    }

    fn config(url: &str, api_key: Option<&str>) -> ResolvedConfig {
        let mut raw = ModelConfig::new("ollama", "llama3").with_api_base(url);
        raw.api_key = api_key.map(str::to_string);
        resolve(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_payload_is_sanitized_with_default_max_tokens() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(json!({
                "model": "llama3",
                "messages": [{"role": "user", "content": "a\nb"}],
                "max_tokens": 64,
                "stream": false
            })))
            .with_status(200)
            .with_body(json!({"choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]}).to_string())
            .create_async()
            .await;

        let config = config(&server.url(), None);
        let request = CompletionRequest::new(vec![Message::user(vec![
            ContentPart::text("a"),
            ContentPart::image("http://x/img.png"),
            ContentPart::text("b"),
        ])]);

        let response = transport()
            .send(config.base_url().unwrap(), &config, &request)
            .await
            .unwrap()
            .into_response()
            .unwrap();

        assert_eq!(response.content, "ok");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bearer_sent_with_api_key() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer local-key")
            .match_body(Matcher::PartialJson(json!({"max_tokens": 512, "stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;

        let config = config(&server.url(), Some("local-key"));
        let request = CompletionRequest::new(vec![Message::user("hi")]).with_stream(true);

        let stream = transport()
            .send(config.base_url().unwrap(), &config, &request)
            .await
            .unwrap()
            .into_stream()
            .unwrap();
        let chunks: Vec<CompletionChunk> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks, vec![CompletionChunk::text("Hi"), CompletionChunk::text(" there")]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("gateway exploded")
            .create_async()
            .await;

        let config = config(&server.url(), None);
        let request = CompletionRequest::new(vec![Message::user("hi")]).with_max_tokens(5);

        match transport()
            .send(config.base_url().unwrap(), &config, &request)
            .await
            .unwrap_err()
        {
            Error::UpstreamStatus {
                status,
                body_preview,
                ..
            } => {
                assert_eq!(status, 500);
                assert_eq!(body_preview, "gateway exploded");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_success_body_keeps_diagnostics() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("x-request-id", "req-7")
            .with_body("<html>proxy login</html>")
            .create_async()
            .await;

        let config = config(&server.url(), None);
        let request = CompletionRequest::new(vec![Message::user("hi")]);

        match transport()
            .send(config.base_url().unwrap(), &config, &request)
            .await
            .unwrap_err()
        {
            Error::InvalidBody {
                status,
                headers,
                body_preview,
                ..
            } => {
                assert_eq!(status, 200);
                assert_eq!(headers.get("x-request-id").unwrap(), "req-7");
                assert_eq!(body_preview, "<html>proxy login</html>");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_token_provider_credential_is_sent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer aad-token")
            .match_body(Matcher::PartialJson(json!({"model": "gpt-4o"})))
            .with_status(200)
            .with_body(json!({"choices": [{"message": {"content": "ok"}}]}).to_string())
            .expect(1)
            .create_async()
            .await;

        let fetched = Arc::new(AtomicUsize::new(0));
        let counter = fetched.clone();
        let provider: Arc<dyn TokenProvider> = Arc::new(move || -> Result<SecretString> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(SecretString::from("aad-token".to_string()))
        });
        let raw = ModelConfig::new("azure", "gpt-4o").with_api_base(server.url());
        let config = resolve_with(&raw, Some(provider)).unwrap();
        assert_eq!(fetched.load(Ordering::SeqCst), 0);

        let request = CompletionRequest::new(vec![Message::user("hi")]);
        let response = transport()
            .send(config.base_url().unwrap(), &config, &request)
            .await
            .unwrap()
            .into_response()
            .unwrap();

        assert_eq!(response.content, "ok");
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_provider_failure_stops_request() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", "/chat/completions").expect(0).create_async().await;

        let provider: Arc<dyn TokenProvider> =
            Arc::new(|| -> Result<SecretString> { Err(Error::token_provider("az not logged in")) });
        let raw = ModelConfig::new("azure", "gpt-4o").with_api_base(server.url());
        let config = resolve_with(&raw, Some(provider)).unwrap();

        let request = CompletionRequest::new(vec![Message::user("hi")]);
        let err = transport()
            .send(config.base_url().unwrap(), &config, &request)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TokenProvider(_)));
        mock.assert_async().await;
    }
}
