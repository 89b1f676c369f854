//! `/healthz` endpoint. Liveness only; no dependency checks.

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
}

/// Build the health response.
pub fn health_check() -> HealthResponse {
    HealthResponse { status: "ok" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_status_only() {
        let json = serde_json::to_value(health_check()).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok"}));
    }
}
