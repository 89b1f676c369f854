//! `QuillServer`: router assembly and the listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use quill_gateway::InferenceGateway;
use quill_settings::Settings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::errors::{ApiError, ErrorReply};
use crate::health::{self, HealthResponse};
use crate::middleware::{CorrelationId, with_request_layers};
use crate::pipeline::{OcrPipeline, OcrResponse};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The request pipeline.
    pub pipeline: OcrPipeline,
    /// Prometheus renderer, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The HTTP service.
pub struct QuillServer {
    settings: Arc<Settings>,
    pipeline: OcrPipeline,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl QuillServer {
    /// Create a server over an already-verified gateway.
    pub fn new(settings: Arc<Settings>, gateway: Arc<dyn InferenceGateway>) -> Self {
        Self {
            pipeline: OcrPipeline::new(settings.clone(), gateway),
            settings,
            metrics: None,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes and layers.
    pub fn router(&self) -> Router {
        let state = AppState {
            pipeline: self.pipeline.clone(),
            metrics: self.metrics.clone(),
        };
        let body_limit = self.settings.request_body_limit();

        let mut router = Router::new()
            .route("/healthz", get(healthz))
            .route(
                "/api/v1/ocr",
                post(ocr).layer(DefaultBodyLimit::max(body_limit)),
            );
        if self.metrics.is_some() {
            router = router.route("/metrics", get(render_metrics));
        }
        with_request_layers(router.with_state(state))
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            TcpListener::bind((self.settings.api_host.as_str(), self.settings.api_port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(error) = server.await {
                error!(%error, "server terminated");
            }
        });

        info!(%addr, model_name = %self.settings.model_name, "listening");
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET /healthz
async fn healthz() -> Json<HealthResponse> {
    Json(health::health_check())
}

/// POST /api/v1/ocr
async fn ocr(
    State(state): State<AppState>,
    CorrelationId(request_id): CorrelationId,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<OcrResponse>, ErrorReply> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            let error = ApiError::validation(rejection.body_text());
            return Err(ErrorReply::new(request_id, error));
        }
    };
    match state.pipeline.handle(&request_id, &mut multipart).await {
        Ok(response) => Ok(Json(response)),
        Err(error) => Err(ErrorReply::new(request_id, error)),
    }
}

/// GET /metrics
async fn render_metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}
