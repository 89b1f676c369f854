//! # quill-server
//!
//! Axum HTTP surface of the Quill transcription service.
//!
//! - `GET /healthz`: liveness
//! - `POST /api/v1/ocr`: multipart upload (field `file`) to markdown
//! - `GET /metrics`: Prometheus text, when a recorder is installed
//!
//! Every response carries an `x-request-id` correlation header. Failures use
//! the stable taxonomy in [`errors`].

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod server;
pub mod shutdown;

pub use errors::{ApiError, ErrorCode, ErrorReply, ErrorResponse};
pub use pipeline::{OcrPipeline, OcrResponse, UploadedImage};
pub use server::{AppState, QuillServer};
pub use shutdown::{DEFAULT_DRAIN_TIMEOUT, ShutdownCoordinator, shutdown_signal};
