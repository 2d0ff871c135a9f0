use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ErrorBody;
use crate::retrieval::RetrievalError;

/// Retry-After hint attached to rate-limit and unavailability responses.
pub const RETRY_AFTER_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum ApiErrorKind {
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: String,
    },
    #[error("too many concurrent requests")]
    RateLimited,
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("dependency timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// API-boundary error carrying the request identifier it was raised under.
///
/// Every error response renders a machine-readable code, a human-readable
/// message and the request id for log correlation.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: Uuid,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind) -> Self {
        Self {
            kind,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn with_request_id(kind: ApiErrorKind, request_id: Uuid) -> Self {
        Self { kind, request_id }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>, request_id: Uuid) -> Self {
        Self::with_request_id(
            ApiErrorKind::BadRequest {
                code,
                message: message.into(),
            },
            request_id,
        )
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(ApiErrorKind::Internal(err.to_string()))
    }

    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        let (status, error_code, message) = match &self.kind {
            ApiErrorKind::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, *code, message.clone())
            }
            ApiErrorKind::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many concurrent requests. Please try again later.".to_string(),
            ),
            ApiErrorKind::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, *code, message.clone())
            }
            ApiErrorKind::NotFound(message) => {
                (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", message.clone())
            }
            ApiErrorKind::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                message.clone(),
            ),
            ApiErrorKind::Timeout(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT", message.clone())
            }
            // Internal detail stays in the logs, not in the response body.
            ApiErrorKind::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An unexpected error occurred".to_string(),
            ),
        };

        (
            status,
            ErrorBody {
                error_code: error_code.to_string(),
                message,
                request_id: self.request_id,
                details: None,
            },
        )
    }
}

impl From<ApiErrorKind> for ApiError {
    fn from(kind: ApiErrorKind) -> Self {
        Self::new(kind)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = self.status_and_body();

        match &self.kind {
            ApiErrorKind::Internal(detail) => {
                tracing::error!(request_id = %self.request_id, error = %detail, "internal error");
            }
            ApiErrorKind::Timeout(detail) => {
                tracing::warn!(request_id = %self.request_id, error = %detail, "dependency timeout");
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            if let Ok(value) = RETRY_AFTER_SECONDS.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if let Ok(value) = self.request_id.to_string().parse() {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
}

/// Maps retrieval-layer failures onto the API taxonomy.
pub fn from_retrieval(err: RetrievalError, request_id: Uuid) -> ApiError {
    let kind = match err {
        RetrievalError::InvalidQuery(message) => ApiErrorKind::BadRequest {
            code: "EMPTY_QUERY",
            message,
        },
        RetrievalError::InvalidParameter(message) => ApiErrorKind::BadRequest {
            code: "INVALID_PARAMETER",
            message,
        },
        RetrievalError::Timeout(message) => ApiErrorKind::Timeout(message),
        RetrievalError::Unavailable(message) => ApiErrorKind::Unavailable(message),
    };
    ApiError::with_request_id(kind, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let err = ApiError::internal("connection string postgres://secret");
        let (status, body) = err.status_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error_code, "INTERNAL_ERROR");
        assert!(!body.message.contains("secret"));
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = ApiError::new(ApiErrorKind::RateLimited);
        let (status, body) = err.status_and_body();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.error_code, "RATE_LIMITED");
    }

    #[test]
    fn retrieval_taxonomy_is_preserved() {
        let request_id = Uuid::new_v4();
        let err = from_retrieval(
            RetrievalError::InvalidParameter("limit must be between 1 and 20".into()),
            request_id,
        );
        assert_eq!(err.request_id, request_id);
        let (status, body) = err.status_and_body();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_code, "INVALID_PARAMETER");

        let err = from_retrieval(RetrievalError::Timeout("embed timed out".into()), request_id);
        let (status, body) = err.status_and_body();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error_code, "TIMEOUT");
    }
}
