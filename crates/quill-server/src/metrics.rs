//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// OCR requests by outcome (counter, labels: outcome = `success` or an error code).
pub const OCR_REQUESTS_TOTAL: &str = "ocr_requests_total";
/// Time spent waiting on the backend per request (histogram).
pub const OCR_INFERENCE_DURATION_SECONDS: &str = "ocr_inference_duration_seconds";

const INFERENCE_BUCKETS: &[f64] = &[0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 90.0, 120.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(OCR_INFERENCE_DURATION_SECONDS.to_string()),
        INFERENCE_BUCKETS,
    )
}

/// Install the global recorder and return the handle that renders `/metrics`.
///
/// Call once per process, before the first request.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = builder()?.install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}
