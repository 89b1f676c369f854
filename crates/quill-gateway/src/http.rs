//! [`InferenceGateway`] over HTTP.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use quill_settings::Settings;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::errors::GatewayError;
use crate::gateway::InferenceGateway;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ModelList, Sampling};

/// 1×1 transparent PNG used for the capability probe.
const PROBE_IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

const PROBE_PROMPT: &str = "Reply with OK.";

/// Gateway backed by a single shared `reqwest::Client`.
#[derive(Debug)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    model_id: String,
    prompt: String,
    sampling: Sampling,
    startup_timeout: Duration,
}

impl HttpGateway {
    /// Build the client from settings. The per-call timeout and bearer
    /// header are baked into the client.
    pub fn new(settings: &Settings) -> Result<Self, GatewayError> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", settings.backend_api_key))
            .map_err(|e| GatewayError::Client {
                detail: format!("invalid api key: {e}"),
            })?;
        bearer.set_sensitive(true);
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(settings.backend_timeout())
            .default_headers(headers)
            .user_agent(concat!("quill/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Client {
                detail: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: settings.backend_base_url.trim_end_matches('/').to_string(),
            model_id: settings.backend_model_id.clone(),
            prompt: settings.ocr_prompt.clone(),
            sampling: Sampling {
                temperature: settings.temperature,
                top_p: settings.top_p,
                top_k: settings.top_k,
                max_tokens: settings.max_tokens,
            },
            startup_timeout: settings.backend_startup_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a request and decode a 2xx JSON body.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e, elapsed()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<body unreadable: {e}>"));
            return Err(GatewayError::from_status(status.as_u16(), &body, elapsed()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e, elapsed()))?;
        let parsed = serde_json::from_slice(&bytes).map_err(|e| GatewayError::InvalidResponse {
            latency_ms: elapsed(),
            detail: e.to_string(),
        })?;
        debug!(
            backend_status_code = status.as_u16(),
            backend_latency_ms = elapsed(),
            "backend call complete"
        );
        Ok(parsed)
    }
}

#[async_trait]
impl InferenceGateway for HttpGateway {
    async fn startup_check(&self, verify_capability: bool) -> Result<(), GatewayError> {
        let models: ModelList = self
            .execute(
                self.client
                    .get(self.url("/v1/models"))
                    .timeout(self.startup_timeout),
            )
            .await?;
        let available: Vec<String> = models.data.into_iter().map(|m| m.id).collect();
        if !available.iter().any(|id| *id == self.model_id) {
            warn!(model_id = %self.model_id, ?available, "backend does not list model");
            return Err(GatewayError::ModelNotServed {
                model_id: self.model_id.clone(),
                available,
            });
        }

        if verify_capability {
            let probe = ChatCompletionRequest::with_image(
                &self.model_id,
                PROBE_PROMPT,
                PROBE_IMAGE,
                Sampling {
                    max_tokens: 1,
                    ..self.sampling
                },
            );
            let _: serde_json::Value = self
                .execute(
                    self.client
                        .post(self.url("/v1/chat/completions"))
                        .timeout(self.startup_timeout)
                        .json(&probe),
                )
                .await?;
        }

        info!(
            base_url = %self.base_url,
            model_id = %self.model_id,
            verify_capability,
            "backend startup check passed"
        );
        Ok(())
    }

    async fn transcribe(&self, image_data_url: &str) -> Result<String, GatewayError> {
        let started = Instant::now();
        let request =
            ChatCompletionRequest::with_image(&self.model_id, &self.prompt, image_data_url, self.sampling);
        let response: ChatCompletionResponse = self
            .execute(self.client.post(self.url("/v1/chat/completions")).json(&request))
            .await?;
        response
            .into_text()
            .ok_or_else(|| GatewayError::InvalidResponse {
                latency_ms: started.elapsed().as_millis() as u64,
                detail: "response has no message content".to_string(),
            })
    }
}
