//! Tracing and observability infrastructure

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Fails if a subscriber is
/// already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format.as_str() {
        "json" => registry.with(fmt::layer().json()).try_init(),
        "pretty" => registry.with(fmt::layer().pretty()).try_init(),
        other => {
            return Err(Error::config(format!("unknown log format '{}'", other)));
        }
    };

    installed.map_err(|e| Error::config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Outcome of a completion call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Single response returned
    Response,
    /// Stream handed to the caller
    Stream,
    /// Error returned
    Failed,
}

/// Record of a single client call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTrace {
    /// Unique request identifier
    pub request_id: Uuid,
    /// Operation name (`completion`, `response`)
    pub operation: String,
    /// Backend kind
    pub backend: String,
    /// Canonical model identifier
    pub model: String,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// Time until the call returned (for streams, until the stream was handed over)
    pub duration: Option<Duration>,
    /// Outcome once finished
    pub outcome: Option<CallOutcome>,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl CallTrace {
    /// Start a trace
    pub fn start(
        operation: impl Into<String>,
        backend: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            operation: operation.into(),
            backend: backend.into(),
            model: model.into(),
            started_at: Utc::now(),
            duration: None,
            outcome: None,
            clock: Some(Instant::now()),
        }
    }

    /// Finish the trace and emit it as an event
    pub fn finish(&mut self, outcome: CallOutcome) {
        self.duration = self.clock.map(|clock| clock.elapsed());
        self.outcome = Some(outcome);

        info!(
            request_id = %self.request_id,
            operation = %self.operation,
            backend = %self.backend,
            model = %self.model,
            outcome = ?outcome,
            duration_ms = self.duration.map(|d| d.as_millis() as u64).unwrap_or_default(),
            "Call finished"
        );
    }
}
