//! Error types for the unified completion client

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default number of characters kept from an error response body
pub const DEFAULT_BODY_PREVIEW_LIMIT: usize = 800;

/// Result type alias for completion client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the completion client
#[derive(Debug, Error)]
pub enum Error {
    /// A field required by the chosen backend kind is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection, timeout or body-read failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status
    #[error("Upstream returned {status}: response_headers={headers:?} response_body={body_preview}")]
    UpstreamStatus {
        /// HTTP status code
        status: u16,
        /// Response headers, kept for diagnosis
        headers: HeaderMap,
        /// First characters of the response body
        body_preview: String,
    },

    /// A typed response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend answered with a success status but an undecodable body
    #[error("Upstream returned {status} with an invalid body ({source}): response_headers={headers:?} response_body={body_preview}")]
    InvalidBody {
        /// HTTP status code
        status: u16,
        /// Response headers, kept for diagnosis
        headers: HeaderMap,
        /// First characters of the response body
        body_preview: String,
        /// Decoding failure
        #[source]
        source: serde_json::Error,
    },

    /// A bearer token could not be obtained
    #[error("Token provider error: {0}")]
    TokenProvider(String),

    /// The caller asked for something the completion cannot provide
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a token provider error
    pub fn token_provider(msg: impl Into<String>) -> Self {
        Self::TokenProvider(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// HTTP status attached to this error, either directly or through the
    /// transport error's response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UpstreamStatus { status, .. } | Self::InvalidBody { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Build an [`Error::UpstreamStatus`] from a failed response, reading at
    /// most `limit` characters of its body into the preview.
    pub async fn from_response(response: reqwest::Response, limit: usize) -> Self {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body_preview = match response.text().await {
            Ok(body) => preview(&body, limit),
            Err(_) => String::new(),
        };

        Self::UpstreamStatus {
            status,
            headers,
            body_preview,
        }
    }
}

/// Read a successful response and decode it as JSON. A body that does not
/// decode yields [`Error::InvalidBody`] with the status, headers and preview.
pub(crate) async fn json_body<T: DeserializeOwned>(
    response: reqwest::Response,
    limit: usize,
) -> Result<T> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let bytes = response.bytes().await?;

    serde_json::from_slice(&bytes).map_err(|source| Error::InvalidBody {
        status,
        headers,
        body_preview: preview(&String::from_utf8_lossy(&bytes), limit),
        source,
    })
}

/// Truncate `body` to `limit` characters on a char boundary.
pub(crate) fn preview(body: &str, limit: usize) -> String {
    body.chars().take(limit).collect()
}
