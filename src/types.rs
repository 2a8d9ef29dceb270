//! Core request and response types shared by every transport path

use crate::error::{Error, Result};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
}

/// Image reference inside a multi-part message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// URL or `data:` URI of the image
    pub url: String,
    /// Optional detail hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One part of a multi-part message.
///
/// Text and image parts are typed. Any other part (audio, files, parts in a
/// provider-specific shape) is kept as raw JSON and serialized back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Image payload
    Image {
        /// The image reference
        image_url: ImageUrl,
    },
    /// Any other part, as received
    Other(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedPart {
    Text {
        text: String,
    },
    #[serde(rename = "image_url", alias = "image")]
    Image {
        image_url: ImageUrl,
    },
}

impl Serialize for ContentPart {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Text { text } => TypedPart::Text { text: text.clone() }.serialize(serializer),
            Self::Image { image_url } => TypedPart::Image {
                image_url: image_url.clone(),
            }
            .serialize(serializer),
            Self::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ContentPart {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match TypedPart::deserialize(&value) {
            Ok(TypedPart::Text { text }) => Self::Text { text },
            Ok(TypedPart::Image { image_url }) => Self::Image { image_url },
            Err(_) => Self::Other(value),
        })
    }
}

impl ContentPart {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image part
    pub fn image(url: impl Into<String>) -> Self {
        Self::Image {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        }
    }
}

/// Content of a message: a scalar string or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Scalar text content
    Text(String),
    /// Multi-part content
    Parts(Vec<ContentPart>),
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// Message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: MessageContent,
}

impl Message {
    /// Create a message with any content
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
    /// Maximum tokens for completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a new non-streaming completion request
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            stream: false,
            max_tokens: None,
        }
    }

    /// Enable streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set the maximum tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// One increment of generated text.
///
/// A chunk without text is a heartbeat or control frame and can be skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Delta text, if the frame carried any
    pub delta_text: Option<String>,
}

impl CompletionChunk {
    /// Create a chunk carrying text
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta_text: Some(delta.into()),
        }
    }

    /// Create a chunk carrying no text
    pub fn empty() -> Self {
        Self::default()
    }

    /// Delta text, or `""` for an empty chunk
    pub fn as_str(&self) -> &str {
        self.delta_text.as_deref().unwrap_or("")
    }

    /// Whether this chunk carries no text
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

/// Non-streaming completion response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text
    pub content: String,
    /// Finish reason reported by the backend
    pub finish_reason: Option<String>,
}

/// Lazy, single-pass sequence of completion chunks.
///
/// The stream owns the underlying connection; dropping it releases the
/// connection whether or not the sequence was fully consumed.
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<CompletionChunk>> + Send>>,
}

impl CompletionStream {
    /// Wrap any chunk stream
    pub fn new(stream: impl Stream<Item = Result<CompletionChunk>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Drain the stream and concatenate every delta
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(chunk?.as_str());
        }
        Ok(text)
    }
}

impl Stream for CompletionStream {
    type Item = Result<CompletionChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionStream").finish_non_exhaustive()
    }
}

/// Result of a completion call, identical whichever transport produced it
#[derive(Debug)]
pub enum Completion {
    /// A single response (non-streaming call)
    Response(CompletionResponse),
    /// A lazy sequence of deltas (streaming call)
    Stream(CompletionStream),
}

impl Completion {
    /// Unwrap a non-streaming response
    pub fn into_response(self) -> Result<CompletionResponse> {
        match self {
            Self::Response(response) => Ok(response),
            Self::Stream(_) => Err(Error::invalid_input(
                "expected a completion response, got a stream",
            )),
        }
    }

    /// Unwrap a streaming response
    pub fn into_stream(self) -> Result<CompletionStream> {
        match self {
            Self::Stream(stream) => Ok(stream),
            Self::Response(_) => Err(Error::invalid_input(
                "expected a completion stream, got a response",
            )),
        }
    }
}
