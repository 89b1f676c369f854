//! End-to-end tests: real listener, real HTTP gateway, mocked backend.

use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quill_gateway::{HttpGateway, InferenceGateway};
use quill_server::{ErrorResponse, OcrResponse, QuillServer};
use quill_settings::Settings;

const TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    base: String,
    server: QuillServer,
    handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn shutdown(self) {
        assert!(self.server.shutdown().drain(self.handle, TIMEOUT).await);
    }
}

/// Boot the service against `backend` and run the startup probe first.
async fn boot(backend: &MockServer) -> Harness {
    let settings = Arc::new(Settings {
        api_host: "127.0.0.1".into(),
        api_port: 0,
        backend_base_url: backend.uri(),
        backend_model_id: "quill-e2e".into(),
        model_name: "Quill-E2E".into(),
        ..Settings::default()
    });
    let gateway = HttpGateway::new(&settings).unwrap();
    gateway.startup_check(false).await.unwrap();

    let server = QuillServer::new(settings, Arc::new(gateway));
    let (addr, handle) = server.listen().await.unwrap();
    Harness {
        base: format!("http://{addr}"),
        server,
        handle,
    }
}

async fn mock_models(backend: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"object": "list", "data": [{"id": "quill-e2e"}]})),
        )
        .mount(backend)
        .await;
}

fn image_form(content_type: &str) -> Form {
    let part = Part::bytes(b"\x89PNG\r\n\x1a\nfake".to_vec())
        .file_name("page.png")
        .mime_str(content_type)
        .unwrap();
    Form::new().part("file", part)
}

#[tokio::test]
async fn upload_is_transcribed_end_to_end() {
    let backend = MockServer::start().await;
    mock_models(&backend).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "quill-e2e"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "\n# Page 1\n\nHello\n"}}]
        })))
        .expect(1)
        .mount(&backend)
        .await;

    let harness = boot(&backend).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/ocr", harness.base))
        .header("x-request-id", "e2e-1")
        .multipart(image_form("image/png"))
        .timeout(TIMEOUT)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-request-id"], "e2e-1");
    let body: OcrResponse = response.json().await.unwrap();
    assert_eq!(body.request_id, "e2e-1");
    assert_eq!(body.model, "Quill-E2E");
    assert_eq!(body.markdown, "# Page 1\n\nHello");

    harness.shutdown().await;
}

#[tokio::test]
async fn backend_error_becomes_503_with_generated_id() {
    let backend = MockServer::start().await;
    mock_models(&backend).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "object": "error", "message": "engine dead", "type": "InternalServerError"
        })))
        .mount(&backend)
        .await;

    let harness = boot(&backend).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/ocr", harness.base))
        .multipart(image_form("image/jpeg"))
        .timeout(TIMEOUT)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    let header_id = response.headers()["x-request-id"]
        .to_str()
        .unwrap()
        .to_string();
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.request_id, header_id);
    assert_eq!(body.message, "Model inference failed.");
    assert!(!header_id.is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn disallowed_upload_never_reaches_backend() {
    let backend = MockServer::start().await;
    mock_models(&backend).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let harness = boot(&backend).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/ocr", harness.base))
        .multipart(image_form("image/gif"))
        .timeout(TIMEOUT)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 415);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "unsupported_media_type");

    harness.shutdown().await;
}

#[tokio::test]
async fn healthz_over_the_wire() {
    let backend = MockServer::start().await;
    mock_models(&backend).await;

    let harness = boot(&backend).await;
    let body: Value = reqwest::get(format!("{}/healthz", harness.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok"}));

    harness.shutdown().await;
}
