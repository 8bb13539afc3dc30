use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use crate::process::ToolError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Error returned by every handler. The message is what the caller sees; details belong in
/// the server log.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn extraction_failed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "EXTRACTION_FAILED",
            message,
        )
    }

    pub fn upstream_blocked(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_BLOCKED", message)
    }

    pub fn malformed_output(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "MALFORMED_UPSTREAM_OUTPUT",
            message,
        )
    }

    pub fn artifact_not_found(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ARTIFACT_NOT_FOUND",
            message,
        )
    }

    pub fn ambiguous_artifact(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ARTIFACT_AMBIGUOUS",
            message,
        )
    }

    pub fn archive_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "ARCHIVE_FAILED", message)
    }

    pub fn tool_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "TOOL_TIMEOUT", message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "NETWORK_ERROR", message)
    }

    /// Upstream answered with something other than what the endpoint accepts. Client and server
    /// error statuses are passed through; anything else becomes a 500.
    pub fn upstream_status(status: StatusCode, message: impl Into<String>) -> Self {
        let status = if status.is_client_error() || status.is_server_error() {
            status
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, "UPSTREAM_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Converts a tool failure into the caller-facing error, logging the full stderr.
    /// `public_message` is used for every failure except timeouts.
    pub fn from_tool(error: ToolError, public_message: &str) -> Self {
        warn!("{error}");
        match error {
            ToolError::TimedOut { .. } => {
                Self::tool_timeout("The operation took too long. Try again later.")
            }
            ref failed if failed.is_blocked() => Self::upstream_blocked(public_message),
            _ => Self::extraction_failed(public_message),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}
