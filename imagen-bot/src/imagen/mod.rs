//! Image generation service abstraction.
//!
//! Sessions see the service as a single fallible round trip; the OpenAI
//! Images API adapter lives in [`openai`].

pub mod openai;

use crate::command::ImageRequest;
use crate::message::UploadItem;
use async_trait::async_trait;

pub use openai::OpenAiImages;

/// Image service error.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The service rejected the request; `message` is its own error text.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    /// The outbound request body could not be built.
    #[error("can't encode request: {0}")]
    Encode(String),

    #[error("can't decode response: {0}")]
    Decode(String),

    #[error("service returned no images")]
    Empty,
}

/// Text-to-image and image-to-image service.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Provider name for logs.
    fn provider_name(&self) -> &str;

    /// Create images from a prompt. Returns raw image bytes.
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<Vec<u8>>, ServiceError>;

    /// Edit the given images according to the prompt.
    async fn edit(
        &self,
        request: &ImageRequest,
        images: &[UploadItem],
    ) -> Result<Vec<Vec<u8>>, ServiceError>;
}
