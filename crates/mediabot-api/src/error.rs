//! # Design
//!
//! - One response-side error envelope; handlers map domain failures into
//!   it at the boundary.
//! - The HTTP status follows the pipeline error kind; the stable code
//!   string travels in the body for machine consumers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mediabot_model::PipelineError;
use serde_json::json;

/// API-facing error with a status, stable code, and message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// 400 with the `validation` code.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation",
            message: message.into(),
        }
    }

    /// 404 with the `not_found` code.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    /// 409 with the `conflict` code.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "conflict",
            message: message.into(),
        }
    }

    /// 500 with the `internal` code.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: message.into(),
        }
    }

    /// The HTTP status this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The stable code string carried in the body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Validation { .. }
            | PipelineError::InvalidStateTransition { .. }
            | PipelineError::UnsupportedLink { .. } => StatusCode::BAD_REQUEST,
            PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
            PipelineError::RetryExhausted { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_map_to_statuses() {
        let err: ApiError = PipelineError::UnsupportedLink {
            link: "ftp://x".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "unsupported_link");

        let err: ApiError = PipelineError::NotFound {
            entity: "job",
            id: "x".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = PipelineError::RetryExhausted { attempts: 3 }.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
