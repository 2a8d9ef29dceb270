//! Unified LLM client trait over hosted, enterprise and local backends

use crate::error::Result;
use crate::responses::ResponseOutput;
use crate::types::{Completion, Message};
use async_trait::async_trait;
use serde_json::Value;

/// Unified trait for LLM clients
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a completion request, streaming or not.
    ///
    /// `max_tokens` is passed through on the SDK path; the raw HTTP path
    /// fills in a default when it is `None`.
    async fn get_completion(
        &self,
        messages: Vec<Message>,
        stream: bool,
        max_tokens: Option<u32>,
    ) -> Result<Completion>;

    /// Call the Responses API
    async fn get_response(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Value>>,
    ) -> Result<ResponseOutput>;

    /// Get the client type for debugging/logging
    fn client_type(&self) -> &str;

    /// Get the base URL the client talks to
    fn endpoint(&self) -> &str;
}
