//! Error types for the relay-provider crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Boxed cause attached to an [`LlmError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of every failure that crosses a component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Network failure, refused connection, 5xx, broken stream.
    ConnectionFailed,
    /// Credentials rejected (HTTP 401).
    AuthFailed,
    /// Backend throttled the request (HTTP 429).
    RateLimited,
    /// Requested model is not installed or not served.
    ModelNotFound,
    /// Request rejected locally before any network call.
    InvalidRequest,
    /// Operation exceeded its deadline.
    Timeout,
    /// Account quota exhausted.
    QuotaExceeded,
    /// Backend refused to produce content.
    ContentFiltered,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Wire code, e.g. `CONNECTION_FAILED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::ModelNotFound => "MODEL_NOT_FOUND",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Timeout => "TIMEOUT",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::ContentFiltered => "CONTENT_FILTERED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Retryability used when a constructor does not say otherwise.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed | Self::RateLimited | Self::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of failure signaling across every layer.
///
/// Always carries a [`ErrorKind`], the id of the provider that produced it,
/// and whether re-attempting the same operation may succeed.
#[derive(Debug, thiserror::Error)]
#[error("[{provider}] {kind}: {message}")]
pub struct LlmError {
    /// Human-readable description.
    pub message: String,
    /// Error classification.
    pub kind: ErrorKind,
    /// Id of the originating provider (or component, e.g. `"manager"`).
    pub provider: String,
    /// Whether the operation may be re-attempted.
    pub retryable: bool,
    /// Underlying cause, if any.
    #[source]
    pub source: Option<BoxError>,
}

impl LlmError {
    /// Create an error whose retryability follows [`ErrorKind::default_retryable`].
    pub fn new(kind: ErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            provider: provider.into(),
            retryable: kind.default_retryable(),
            source: None,
        }
    }

    /// Override the retryable flag.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Local validation failure. Never retryable.
    pub fn invalid_request(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, provider, message).with_retryable(false)
    }

    /// Network-level failure. Retryable.
    pub fn connection_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, provider, message).with_retryable(true)
    }

    /// Deadline exceeded.
    pub fn timeout(provider: impl Into<String>, after: std::time::Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            provider,
            format!("operation timed out after {}ms", after.as_millis()),
        )
    }

    /// Catch-all, non-retryable.
    pub fn unknown(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, provider, message).with_retryable(false)
    }

    /// Request aborted through its cancellation token. Non-retryable.
    pub fn cancelled(provider: impl Into<String>) -> Self {
        Self::unknown(provider, "request aborted")
    }

    /// A failed `initialize`, reported as a retryable `CONNECTION_FAILED`.
    ///
    /// Errors that already have that shape pass through unchanged.
    pub fn initialization(provider: impl Into<String>, err: LlmError) -> Self {
        if err.kind == ErrorKind::ConnectionFailed && err.retryable {
            return err;
        }
        Self::connection_failed(provider, format!("failed to initialize provider: {}", err.message))
            .with_source(err)
    }

    /// Map a non-success HTTP status into the taxonomy.
    ///
    /// 401 → `AUTH_FAILED`, 429 → `RATE_LIMITED` (retryable),
    /// 5xx → `CONNECTION_FAILED` (retryable), anything else → `UNKNOWN`.
    pub fn from_status(provider: impl Into<String>, status: u16, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", body.trim())
        };
        match status {
            401 => Self::new(ErrorKind::AuthFailed, provider, message).with_retryable(false),
            429 => Self::new(ErrorKind::RateLimited, provider, message).with_retryable(true),
            500..=599 => Self::connection_failed(provider, message),
            _ => Self::unknown(provider, message),
        }
    }

    /// Whether the operation may be re-attempted.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}
