//! Error types for upstream provider calls and routing.
//!
//! [`UpstreamError`] describes one failed call to one provider and carries
//! the classification the router needs (retry on the same provider, fail
//! over to the next, or stop). [`RouteError`] is what the router surfaces
//! after the whole candidate chain has been worked through.

use thiserror::Error;

/// Errors from a single call to an upstream provider.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The provider is missing an API key or required configuration.
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The upstream rejected the gateway's credentials (HTTP 401/403).
    #[error("upstream auth rejected: {0}")]
    AuthRejected(String),

    /// The upstream rate-limited the gateway (HTTP 429).
    #[error("upstream rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// The upstream rejected the request itself (non-429 4xx).
    #[error("upstream rejected request: HTTP {status}: {body}")]
    Rejected {
        /// HTTP status the upstream answered with.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The upstream failed server-side (HTTP 5xx).
    #[error("upstream server error: HTTP {status}: {body}")]
    ServerError {
        /// HTTP status the upstream answered with.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The call exceeded the provider's deadline.
    #[error("upstream timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The upstream answered 2xx but the body could not be interpreted.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    /// The provider's circuit is open; no call was attempted.
    #[error("circuit open")]
    CircuitOpen,

    /// Transport-level failure from the HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpstreamError {
    /// Whether retrying the same provider can plausibly succeed.
    ///
    /// Covers transient faults: timeouts, transport errors, 5xx, and 429.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::ServerError { .. } | Self::Http(_)
        )
    }

    /// Whether this failure counts toward opening the provider's circuit.
    ///
    /// Timeouts, transport errors, 5xx, and 429 indicate provider health;
    /// other 4xx are caller faults and leave the circuit alone.
    pub fn is_circuit_failure(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::ServerError { .. } | Self::Http(_)
        )
    }

    /// Upstream-suggested retry delay, when one was provided.
    pub fn suggested_delay_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// A convenience alias for provider call results.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Errors surfaced by [`ModelRouter`](crate::router::ModelRouter) after the
/// candidate chain has been resolved and worked through.
#[derive(Error, Debug)]
pub enum RouteError {
    /// The identity may not request this model, or lacks a permission a
    /// routing rule requires.
    #[error("model \"{model}\" is not permitted for this identity")]
    ModelNotPermitted {
        /// The model the caller asked for.
        model: String,
    },

    /// A provider rejected the request itself; no failover was attempted.
    #[error("upstream \"{provider}\" rejected request: HTTP {status}")]
    UpstreamRejected {
        /// Provider that rejected the request.
        provider: String,
        /// HTTP status it answered with.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Every attempted provider timed out.
    #[error("upstream \"{provider}\" timed out after {timeout_ms}ms")]
    UpstreamTimeout {
        /// The last provider that timed out.
        provider: String,
        /// Its deadline, in milliseconds.
        timeout_ms: u64,
    },

    /// The whole candidate chain failed or was skipped.
    #[error("all providers unavailable for model \"{model}\"")]
    AllProvidersUnavailable {
        /// The model the caller asked for.
        model: String,
        /// Per-provider outcome, in attempt order.
        attempts: Vec<(String, UpstreamError)>,
    },
}
