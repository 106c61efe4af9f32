//! Enrichment client errors.

use thiserror::Error;

/// Result alias for enrichment client calls.
pub type Result<T> = std::result::Result<T, EnrichmentError>;

/// Failure of a single enrichment sub-request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnrichmentError {
    /// The provider has no data for the topic key.
    #[error("no data for topic: {0}")]
    NotFound(String),

    /// The endpoint is not part of the current provider plan (HTTP 402).
    #[error("endpoint not available on current plan")]
    PlanRestricted,

    /// The provider rejected the request with HTTP 429.
    #[error("provider rate limit exceeded")]
    RateLimited,

    /// Any other non-success status.
    #[error("provider error (status {status}): {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Connection, TLS or timeout failure.
    #[error("network error: {0}")]
    Network(String),

    /// The payload did not match the expected schema.
    #[error("unexpected payload shape: {0}")]
    Malformed(String),
}

impl EnrichmentError {
    /// Network failures, 429 and 5xx may succeed on a later attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Network(_) => true,
            Self::Upstream { status, .. } => *status >= 500,
            Self::NotFound(_) | Self::PlanRestricted | Self::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for EnrichmentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for EnrichmentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
