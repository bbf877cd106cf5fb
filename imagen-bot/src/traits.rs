//! Gateway trait for messaging platform adapters.

use crate::message::{ChatId, MessageRef, OutgoingImage};
use async_trait::async_trait;

/// Result type for gateway operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Gateway error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("File download failed: {0}")]
    Download(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Outbound side of a messaging platform.
///
/// Implementations perform a single attempt per call; retrying is layered
/// on top by [`crate::outbound::RetryingGateway`].
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Get the gateway name.
    fn name(&self) -> &'static str;

    /// Send a text message, optionally as a reply. Returns the new message.
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<&MessageRef>,
    ) -> ChannelResult<MessageRef>;

    /// Show the "typing" presence indicator in a chat.
    async fn send_typing(&self, chat_id: ChatId) -> ChannelResult<()>;

    /// Post images as one album in the thread of `origin`. The caption is
    /// attached to the first image.
    async fn send_media_group(
        &self,
        origin: &MessageRef,
        images: &[OutgoingImage],
        caption: &str,
    ) -> ChannelResult<()>;

    /// Download the content of an uploaded file.
    async fn fetch_file(&self, file_id: &str) -> ChannelResult<Vec<u8>>;
}

#[async_trait]
impl<G: Gateway + ?Sized> Gateway for std::sync::Arc<G> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<&MessageRef>,
    ) -> ChannelResult<MessageRef> {
        (**self).send_text(chat_id, text, reply_to).await
    }

    async fn send_typing(&self, chat_id: ChatId) -> ChannelResult<()> {
        (**self).send_typing(chat_id).await
    }

    async fn send_media_group(
        &self,
        origin: &MessageRef,
        images: &[OutgoingImage],
        caption: &str,
    ) -> ChannelResult<()> {
        (**self).send_media_group(origin, images, caption).await
    }

    async fn fetch_file(&self, file_id: &str) -> ChannelResult<Vec<u8>> {
        (**self).fetch_file(file_id).await
    }
}
