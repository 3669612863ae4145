//! Pipeline error types with HTTP status code mapping.
//!
//! [`PipelineError`] is the central error type of the service. Ingestion
//! runs return it to the scheduler, and the REST layer converts it into a
//! structured JSON error response.
//!
//! Unmapped status codes and unregistered devices are *not* errors: they
//! drop a single record and are counted in the run report instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "unknown source: parking",
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
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error taxonomy of the ingestion pipeline.
///
/// # Error Code Ranges
///
/// | Range     | Category           | HTTP Status               |
/// |-----------|--------------------|---------------------------|
/// | 1000–1999 | Request/Config     | 400 Bad Request           |
/// | 2000–2999 | Not Found          | 404 Not Found             |
/// | 3000–3999 | Server/Persistence | 500 Internal Server Error |
/// | 5000–5999 | Upstream sources   | 502 Bad Gateway           |
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An external source could not be reached or returned garbage.
    ///
    /// The run is aborted and the cursor stays where it was.
    #[error("source {source_name} unreachable: {reason}")]
    SourceUnreachable {
        /// Name of the failing source.
        source_name: String,
        /// Underlying failure description.
        reason: String,
    },

    /// A transactional write or a snapshot read failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A downstream notification (e.g. SMS) could not be delivered.
    #[error("notification delivery failed for {recipient}: {reason}")]
    Notification {
        /// Recipient that did not receive the message.
        recipient: String,
        /// Underlying failure description.
        reason: String,
    },

    /// No source is registered under the given name.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Builds a [`PipelineError::SourceUnreachable`] from any displayable error.
    pub fn unreachable(source_name: &str, reason: impl std::fmt::Display) -> Self {
        Self::SourceUnreachable {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 1001,
            Self::UnknownSource(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::SourceUnreachable { .. } => 5001,
            Self::Notification { .. } => 5002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSource(_) => StatusCode::NOT_FOUND,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SourceUnreachable { .. } | Self::Notification { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_maps_to_bad_gateway() {
        let err = PipelineError::unreachable("access_control", "connection refused");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_code(), 5001);
        assert!(err.to_string().contains("access_control"));
    }

    #[test]
    fn unknown_source_maps_to_not_found() {
        let err = PipelineError::UnknownSource("parking".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn sqlx_errors_become_persistence_errors() {
        let err = PipelineError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.error_code(), 3001);
    }
}
