//! Gateway error types.
//!
//! Errors map to HTTP status codes via the `IntoResponse` impl with a
//! `{"error": {"code", "message"}}` body.
//!
//! The force-refresh endpoint does not use this type; it answers with its own
//! response body on every outcome.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (code, message) = match self {
            GatewayError::Unauthorized(reason) => ("UNAUTHORIZED", reason),
            GatewayError::NotFound(resource) => ("NOT_FOUND", resource),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"management\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}
