//! Gateway error types.
//!
//! `reqwest` errors never leave this crate. They are classified into
//! [`GatewayError`] variants that carry the diagnostics the request log needs
//! (status code, latency, error class).

use thiserror::Error;

/// Errors from a backend call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The HTTP client could not be built.
    #[error("backend client setup failed: {detail}")]
    Client {
        /// What was wrong.
        detail: String,
    },

    /// The call exceeded the client timeout.
    #[error("backend call timed out after {latency_ms}ms")]
    Timeout {
        /// Time spent before giving up.
        latency_ms: u64,
    },

    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status} ({error_class}): {detail}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Round-trip time.
        latency_ms: u64,
        /// Backend error type, or `http_<status>` when the body had none.
        error_class: String,
        /// Backend error message.
        detail: String,
    },

    /// The backend could not be reached or the connection broke.
    #[error("backend unreachable ({error_class}): {detail}")]
    Transport {
        /// Time spent before the failure.
        latency_ms: u64,
        /// `connect`, `request`, `body`, or `other`.
        error_class: String,
        /// Underlying error message.
        detail: String,
    },

    /// The backend answered 2xx but the payload was unusable.
    #[error("invalid backend response: {detail}")]
    InvalidResponse {
        /// Round-trip time.
        latency_ms: u64,
        /// What was wrong with the payload.
        detail: String,
    },

    /// The backend does not list the configured model.
    #[error("backend does not serve model `{model_id}` (available: {})", available.join(", "))]
    ModelNotServed {
        /// Configured served-model id.
        model_id: String,
        /// Ids the backend reported.
        available: Vec<String>,
    },
}

impl GatewayError {
    /// Classify a transport-level `reqwest` failure.
    pub(crate) fn from_reqwest(error: &reqwest::Error, latency_ms: u64) -> Self {
        if error.is_timeout() {
            return Self::Timeout { latency_ms };
        }
        if error.is_decode() {
            return Self::InvalidResponse {
                latency_ms,
                detail: error.to_string(),
            };
        }
        let error_class = if error.is_connect() {
            "connect"
        } else if error.is_body() {
            "body"
        } else if error.is_request() {
            "request"
        } else {
            "other"
        };
        Self::Transport {
            latency_ms,
            error_class: error_class.to_string(),
            detail: error.to_string(),
        }
    }

    /// Build a [`GatewayError::Backend`] from a non-success response body.
    pub(crate) fn from_status(status: u16, body: &str, latency_ms: u64) -> Self {
        let (detail, error_class) = parse_api_error(body, status);
        Self::Backend {
            status,
            latency_ms,
            error_class: error_class.unwrap_or_else(|| format!("http_{status}")),
            detail,
        }
    }

    /// Whether the call ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Backend status code, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Round-trip latency, when a call was attempted.
    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            Self::Timeout { latency_ms }
            | Self::Backend { latency_ms, .. }
            | Self::Transport { latency_ms, .. }
            | Self::InvalidResponse { latency_ms, .. } => Some(*latency_ms),
            Self::Client { .. } | Self::ModelNotServed { .. } => None,
        }
    }

    /// Short machine-readable class for logs.
    pub fn error_class(&self) -> &str {
        match self {
            Self::Client { .. } => "client",
            Self::Timeout { .. } => "timeout",
            Self::Backend { error_class, .. } | Self::Transport { error_class, .. } => {
                error_class
            }
            Self::InvalidResponse { .. } => "invalid_response",
            Self::ModelNotServed { .. } => "model_not_served",
        }
    }
}

/// Extract `(message, type)` from a backend error body.
///
/// Accepts both the flat `{"message", "type"}` shape and the nested
/// `{"error": {"message", "type"}}` shape.
fn parse_api_error(body: &str, status: u16) -> (String, Option<String>) {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return (format!("HTTP {status}: {}", body.trim()), None);
    };
    let error = if json["error"].is_object() {
        &json["error"]
    } else {
        &json
    };
    let message = error["message"]
        .as_str()
        .or_else(|| json["detail"].as_str())
        .unwrap_or("Unknown error")
        .to_string();
    let class = error["type"].as_str().map(String::from);
    (message, class)
}
