//! The OCR request pipeline.
//!
//! ```text
//! multipart part ─► content-type gate ─► capped read ─► empty gate ─► size gate
//!   ─► data URL ─► gateway.transcribe (deadline) ─► trim ─► OcrResponse
//! ```
//!
//! Every failure short-circuits into an [`ApiError`]. The pipeline never
//! touches the model store.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use base64::Engine as _;
use bytes::Bytes;
use futures::{FutureExt as _, Stream, StreamExt as _};
use quill_gateway::InferenceGateway;
use quill_settings::Settings;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::errors::ApiError;
use crate::metrics::{OCR_INFERENCE_DURATION_SECONDS, OCR_REQUESTS_TOTAL};
use crate::middleware::panic_message;

/// Multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

/// An upload that passed the content-type gate.
#[derive(Clone, Debug)]
pub struct UploadedImage {
    /// Raw bytes as received.
    pub bytes: Bytes,
    /// Declared content type.
    pub content_type: String,
    /// Client-supplied filename (advisory).
    pub file_name: Option<String>,
}

/// Success body of `POST /api/v1/ocr`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResponse {
    /// Correlation id.
    pub request_id: String,
    /// Display model name.
    pub model: String,
    /// Extracted text, trimmed.
    pub markdown: String,
    /// Wall time from request start to response.
    pub processing_ms: u64,
}

/// Validates uploads and drives the gateway.
#[derive(Clone)]
pub struct OcrPipeline {
    settings: Arc<Settings>,
    gateway: Arc<dyn InferenceGateway>,
}

impl OcrPipeline {
    /// Create a pipeline over a shared gateway.
    pub fn new(settings: Arc<Settings>, gateway: Arc<dyn InferenceGateway>) -> Self {
        Self { settings, gateway }
    }

    /// Run a multipart request through every step.
    pub async fn handle(
        &self,
        request_id: &str,
        multipart: &mut Multipart,
    ) -> Result<OcrResponse, ApiError> {
        let started = Instant::now();
        let result = match self.read_upload(multipart).await {
            Ok(image) => self.process(request_id, image, started).await,
            Err(error) => Err(error),
        };
        let outcome = match &result {
            Ok(_) => "success",
            Err(error) => error.code.as_str(),
        };
        metrics::counter!(OCR_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    /// Find the `file` part, gate its content type, and read it up to the
    /// ceiling.
    pub async fn read_upload(&self, multipart: &mut Multipart) -> Result<UploadedImage, ApiError> {
        let limit = self.settings.max_upload_bytes();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| self.multipart_error(&e))?
        {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }

            let content_type = field.content_type().map(str::to_string);
            let Some(content_type) = content_type.filter(|ct| self.settings.allows_content_type(ct))
            else {
                return Err(ApiError::unsupported_media_type(field.content_type()));
            };
            let file_name = field.file_name().map(str::to_string);

            return match read_capped(field, limit)
                .await
                .map_err(|e| self.multipart_error(&e))?
            {
                Capped::Complete(bytes) => Ok(UploadedImage {
                    bytes,
                    content_type,
                    file_name,
                }),
                Capped::TooLarge => Err(ApiError::file_too_large(self.settings.max_upload_megabytes)),
            };
        }
        Err(ApiError::validation(format!("Field required: {FILE_FIELD}")))
    }

    /// Size gates, encoding, and the deadline-bounded backend call.
    pub async fn process(
        &self,
        request_id: &str,
        image: UploadedImage,
        started: Instant,
    ) -> Result<OcrResponse, ApiError> {
        if image.bytes.is_empty() {
            return Err(ApiError::empty_file());
        }
        if image.bytes.len() > self.settings.max_upload_bytes() {
            return Err(ApiError::file_too_large(self.settings.max_upload_megabytes));
        }

        info!(
            request_id,
            file_name = image.file_name.as_deref(),
            file_size = image.bytes.len(),
            content_type = %image.content_type,
            model_name = %self.settings.model_name,
            model_repo_id = %self.settings.model_repo_id,
            "ocr request accepted"
        );

        let data_url = to_data_url(&image.bytes, &normalize_mime(&image.content_type));
        drop(image);

        let inference_started = Instant::now();
        let call = AssertUnwindSafe(self.gateway.transcribe(&data_url)).catch_unwind();
        let outcome = tokio::time::timeout(self.settings.inference_timeout(), call).await;
        metrics::histogram!(OCR_INFERENCE_DURATION_SECONDS)
            .record(inference_started.elapsed().as_secs_f64());

        let text = match outcome {
            Err(_elapsed) => {
                warn!(
                    request_id,
                    backend_error_class = "deadline",
                    timeout_secs = self.settings.inference_timeout_secs,
                    "inference deadline exceeded"
                );
                return Err(ApiError::inference_timeout());
            }
            Ok(Err(panic)) => {
                error!(request_id, panic = %panic_message(&*panic), "gateway panicked");
                return Err(ApiError::inference_failure());
            }
            Ok(Ok(Err(err))) if err.is_timeout() => {
                warn!(
                    request_id,
                    backend_latency_ms = err.latency_ms(),
                    backend_error_class = err.error_class(),
                    "backend call timed out"
                );
                return Err(ApiError::inference_timeout());
            }
            Ok(Ok(Err(err))) => {
                error!(
                    request_id,
                    backend_status_code = err.status_code(),
                    backend_latency_ms = err.latency_ms(),
                    backend_error_class = err.error_class(),
                    error = %err,
                    "inference failed"
                );
                return Err(ApiError::inference_failure());
            }
            Ok(Ok(Ok(text))) => text,
        };

        Ok(OcrResponse {
            request_id: request_id.to_string(),
            model: self.settings.model_name.clone(),
            markdown: text.trim().to_string(),
            processing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// A body-limit rejection is an oversize upload; anything else is a
    /// malformed request.
    fn multipart_error(&self, error: &MultipartError) -> ApiError {
        if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::file_too_large(self.settings.max_upload_megabytes);
        }
        ApiError::validation(format!("Invalid multipart payload: {}", error.body_text()))
    }
}

/// Result of a bounded read.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Capped {
    /// The whole body, at most `limit` bytes.
    Complete(Bytes),
    /// More than `limit` bytes arrived; the rest was not read.
    TooLarge,
}

/// Accumulate chunks until the stream ends or exceeds `limit`.
pub(crate) async fn read_capped<S, E>(stream: S, limit: usize) -> Result<Capped, E>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buffer.len() + chunk.len() > limit {
            return Ok(Capped::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Capped::Complete(Bytes::from(buffer)))
}

/// Lowercase, drop parameters, and fold JPEG aliases.
pub fn normalize_mime(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "" | "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => essence,
    }
}

/// `data:<mime>;base64,<payload>`
pub fn to_data_url(bytes: &[u8], mime: &str) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{payload}")
}
