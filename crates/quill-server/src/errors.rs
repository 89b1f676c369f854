//! Client-facing error taxonomy.
//!
//! | Code | Status |
//! |---|---|
//! | `unsupported_media_type` | 415 |
//! | `empty_file` | 400 |
//! | `file_too_large` | 413 |
//! | `inference_timeout` | 408 |
//! | `inference_failure` | 503 |
//! | `validation_error` | 422 |
//! | `internal_server_error` | 500 |
//!
//! Every error body has the shape `{"request_id", "error_code", "message"}`.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Stable machine-readable error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Upload content type is not on the allow-list.
    UnsupportedMediaType,
    /// Upload has zero bytes.
    EmptyFile,
    /// Upload exceeds the size ceiling.
    FileTooLarge,
    /// Inference exceeded its deadline.
    InferenceTimeout,
    /// The backend failed.
    InferenceFailure,
    /// The request did not have the expected shape.
    ValidationError,
    /// Anything unhandled.
    InternalServerError,
}

impl ErrorCode {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::EmptyFile => "empty_file",
            Self::FileTooLarge => "file_too_large",
            Self::InferenceTimeout => "inference_timeout",
            Self::InferenceFailure => "inference_failure",
            Self::ValidationError => "validation_error",
            Self::InternalServerError => "internal_server_error",
        }
    }

    /// HTTP status for this code.
    pub fn status(self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::EmptyFile => StatusCode::BAD_REQUEST,
            Self::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InferenceTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::InferenceFailure => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that is safe to show to the client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// Stable code; also decides the status.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 415 for a content type outside the allow-list.
    pub fn unsupported_media_type(content_type: Option<&str>) -> Self {
        Self::new(
            ErrorCode::UnsupportedMediaType,
            format!("Unsupported file type: {}", content_type.unwrap_or("none")),
        )
    }

    /// 400 for a zero-length upload.
    pub fn empty_file() -> Self {
        Self::new(ErrorCode::EmptyFile, "Uploaded file is empty.")
    }

    /// 413 for an upload over the ceiling.
    pub fn file_too_large(max_megabytes: u64) -> Self {
        Self::new(
            ErrorCode::FileTooLarge,
            format!("File exceeds {max_megabytes}MB limit."),
        )
    }

    /// 408 when the deadline elapses.
    pub fn inference_timeout() -> Self {
        Self::new(ErrorCode::InferenceTimeout, "Inference timed out.")
    }

    /// 503 for any backend failure.
    pub fn inference_failure() -> Self {
        Self::new(ErrorCode::InferenceFailure, "Model inference failed.")
    }

    /// 422 for a malformed request.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// 500. The message never carries internal detail.
    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalServerError, "Unexpected server error.")
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

/// Wire shape of every error body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Correlation id of the request.
    pub request_id: String,
    /// Stable error code.
    pub error_code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// An [`ApiError`] bound to the request it belongs to.
#[derive(Debug)]
pub struct ErrorReply {
    /// Correlation id.
    pub request_id: String,
    /// The error.
    pub error: ApiError,
}

impl ErrorReply {
    /// Attach a correlation id.
    pub fn new(request_id: impl Into<String>, error: ApiError) -> Self {
        Self {
            request_id: request_id.into(),
            error,
        }
    }
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            error!(
                request_id = %self.request_id,
                status_code = status.as_u16(),
                error_code = %self.error.code,
                "request failed"
            );
        } else {
            warn!(
                request_id = %self.request_id,
                status_code = status.as_u16(),
                error_code = %self.error.code,
                message = %self.error.message,
                "request rejected"
            );
        }
        let body = ErrorResponse {
            request_id: self.request_id,
            error_code: self.error.code,
            message: self.error.message,
        };
        (status, Json(body)).into_response()
    }
}
