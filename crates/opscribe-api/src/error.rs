//! API error types and JSON error response formatting.
//!
//! ApiError maps domain errors to HTTP status codes: missing entities to
//! 404, bad input to 400, uniqueness violations to 409, transient provider failures to 503 with a
//! `Retry-After` header and fatal provider failures to 502.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use opscribe_core::error::OpscribeError;

/// Retry-After sent for transient failures when the provider gave none.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 409 Conflict - the write collides with existing data.
    Conflict(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 502 Bad Gateway - the embedding provider failed in a way retrying won't fix.
    BadGateway(String),
    /// 503 Service Unavailable - transient upstream failure; retry later.
    ServiceUnavailable {
        message: String,
        retry_after_secs: u64,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "provider_error", msg),
            ApiError::ServiceUnavailable {
                message,
                retry_after_secs,
            } => {
                retry_after = Some(retry_after_secs);
                (StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable", message)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<OpscribeError> for ApiError {
    fn from(err: OpscribeError) -> Self {
        match err {
            OpscribeError::NotFound(msg) => ApiError::NotFound(msg),
            OpscribeError::InvalidArgument(msg) => ApiError::BadRequest(msg),
            OpscribeError::Conflict(msg) => ApiError::Conflict(msg),
            OpscribeError::Provider(provider) if provider.is_retryable() => {
                ApiError::ServiceUnavailable {
                    retry_after_secs: provider
                        .retry_after_secs()
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
                    message: provider.to_string(),
                }
            }
            OpscribeError::Provider(provider) => ApiError::BadGateway(provider.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opscribe_core::error::{ProviderError, ProviderErrorKind};

    fn status_of(err: OpscribeError) -> (StatusCode, Option<String>) {
        let response = ApiError::from(err).into_response();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.to_str().unwrap().to_string());
        (response.status(), retry_after)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(OpscribeError::NotFound("graph".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OpscribeError::InvalidArgument("limit".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(OpscribeError::Conflict("node key".into())).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OpscribeError::Storage("disk".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(OpscribeError::DimensionMismatch {
                expected: 1536,
                actual: 3
            })
            .0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_transient_provider_error_is_503_with_retry_after() {
        let (status, retry_after) =
            status_of(ProviderError::new(ProviderErrorKind::Server, "HTTP 503").into());
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(retry_after.as_deref(), Some("5"));

        let (status, retry_after) = status_of(
            ProviderError::new(
                ProviderErrorKind::RateLimited {
                    retry_after_secs: Some(12),
                },
                "HTTP 429",
            )
            .into(),
        );
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(retry_after.as_deref(), Some("12"));
    }

    #[test]
    fn test_fatal_provider_error_is_502() {
        let (status, retry_after) =
            status_of(ProviderError::new(ProviderErrorKind::Auth, "HTTP 401").into());
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(retry_after.is_none());
    }
}
