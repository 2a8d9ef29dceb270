//! # Unified Completion Client
//!
//! One interface for text generation against hosted, enterprise and local
//! OpenAI-compatible backends, streaming or not.
//!
//! ## Features
//!
//! - **Provider resolution**: backend kind, canonical model names and credentials from plain strings
//! - **SDK path with raw HTTP fallback**: server errors get exactly one retry over raw HTTP
//! - **Loopback gateways**: local servers are always talked to over raw HTTP
//! - **Uniform streaming**: SDK streams and SSE bodies surface as the same chunk sequence
//! - **Handle cache**: one SDK handle per base URL and credential
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use unified_completion::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::from_config(
//!         &ModelConfig::new("ollama", "llama3").with_api_base("http://localhost:11434/v1"),
//!     )?;
//!
//!     let completion = client
//!         .get_completion(vec![Message::user("Summarize the table")], true, None)
//!         .await?;
//!
//!     let mut stream = completion.into_stream()?;
//!     while let Some(chunk) = stream.next().await {
//!         print!("{}", chunk?.as_str());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fallback;
pub mod llm_client;
pub mod provider;
pub mod responses;
pub mod router;
pub mod sanitize;
pub mod sdk;
pub mod stream;
pub mod tracing_ext;
pub mod types;

// Re-exports for convenience
pub use crate::cache::{HandleCache, HandleKey};
pub use crate::client::Client;
pub use crate::config::{ClientSettings, LoggingConfig, ModelConfig, Settings};
pub use crate::error::{Error, Result};
pub use crate::llm_client::LlmClient;
pub use crate::provider::{resolve, resolve_with, BackendKind, Credential, ResolvedConfig, TokenProvider};
pub use crate::responses::{ResponseOutput, ResponsesRequest};
pub use crate::router::{classify, CompletionRouter, Disposition, Route};
pub use crate::sanitize::{sanitize_message, sanitize_messages};
pub use crate::types::{
    Completion, CompletionChunk, CompletionRequest, CompletionResponse, CompletionStream,
    ContentPart, Message, MessageContent, Role,
};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::client::Client;
    pub use crate::config::{ModelConfig, Settings};
    pub use crate::error::{Error, Result};
    pub use crate::llm_client::LlmClient;
    pub use crate::types::{Completion, CompletionChunk, ContentPart, Message};
}
