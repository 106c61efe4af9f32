//! Pipeline error types with HTTP status code mapping.
//!
//! [`PipelineError`] is the central error type for the service. Each variant
//! maps to a specific HTTP status code and structured JSON error response.
//! Job-level failures use the same type so the consumer can classify them
//! before routing a job to retry or the dead-letter queue.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::enrichment::EnrichmentError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid call: token symbol is required",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`PipelineError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Service-wide error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                     |
/// |-----------|-------------------|---------------------------------|
/// | 1000–1999 | Validation / auth | 400 Bad Request / 401           |
/// | 2000–2999 | Not Found         | 404 Not Found                   |
/// | 3000–3999 | Server / broker   | 500 / 503                       |
/// | 4000–4999 | Enrichment        | 502 Bad Gateway / 503           |
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A call submission or request body failed validation.
    #[error("invalid call: {0}")]
    Validation(String),

    /// Unknown queue name in an admin request.
    #[error("unknown queue: {0}")]
    InvalidQueue(String),

    /// A destructive admin operation was requested without confirmation.
    #[error("purge confirmation required: set \"confirm\": true")]
    ConfirmationRequired,

    /// Missing or invalid bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// No narrative exists for the given token address or id.
    #[error("narrative not found: {0}")]
    NarrativeNotFound(String),

    /// The enrichment provider had no usable topic data for the token.
    #[error("enrichment unavailable: {0}")]
    EnrichmentUnavailable(String),

    /// Network failure, 5xx or 429 from the enrichment provider.
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// The broker could not accept or deliver a message.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A queue message body could not be decoded into a job.
    #[error("malformed job payload: {0}")]
    MalformedJob(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Validation(_) => 1001,
            Self::InvalidQueue(_) => 1002,
            Self::ConfirmationRequired => 1003,
            Self::MalformedJob(_) => 1004,
            Self::Unauthorized => 1100,
            Self::NarrativeNotFound(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::BrokerUnavailable(_) => 3002,
            Self::EnrichmentUnavailable(_) => 4001,
            Self::TransientProvider(_) => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidQueue(_)
            | Self::ConfirmationRequired
            | Self::MalformedJob(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NarrativeNotFound(_) => StatusCode::NOT_FOUND,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BrokerUnavailable(_) | Self::TransientProvider(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::EnrichmentUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Returns `true` for errors a later attempt may not reproduce.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientProvider(_) | Self::BrokerUnavailable(_) | Self::Persistence(_)
        )
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<EnrichmentError> for PipelineError {
    fn from(err: EnrichmentError) -> Self {
        if err.is_transient() {
            Self::TransientProvider(err.to_string())
        } else {
            Self::EnrichmentUnavailable(err.to_string())
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
