//! The [`InferenceGateway`] trait.

use async_trait::async_trait;

use crate::errors::GatewayError;

/// Single point of contact with the inference backend.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// request handler.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Verify the backend is up and serves the configured model.
    ///
    /// With `verify_capability` set, also confirm it accepts image input.
    async fn startup_check(&self, verify_capability: bool) -> Result<(), GatewayError>;

    /// Transcribe one image, given as a `data:` URL.
    async fn transcribe(&self, image_data_url: &str) -> Result<String, GatewayError>;
}
