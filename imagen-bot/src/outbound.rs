//! Outbound send policy.
//!
//! Every outbound call goes through [`RetryingGateway`], which repeats a
//! failed send with the same parameters a fixed number of times, without
//! backoff. Downloads are passed through untouched.

use crate::message::{ChatId, MessageRef, OutgoingImage};
use crate::traits::{ChannelResult, Gateway};
use async_trait::async_trait;
use std::future::Future;

/// Default number of attempts: the first try plus one retry.
pub const DEFAULT_SEND_ATTEMPTS: u32 = 2;

/// Run `op` up to `attempts` times, returning the first success or the last error.
pub async fn with_retry<T, F, Fut>(operation: &'static str, attempts: u32, mut op: F) -> ChannelResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChannelResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    operation,
                    attempt,
                    error = %e,
                    "Outbound send failed, retrying"
                );
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(operation, attempts, error = %e, "Outbound send failed");
                return Err(e);
            }
        }
    }
}

/// Gateway decorator applying the retry policy to sends.
pub struct RetryingGateway<G> {
    inner: G,
    attempts: u32,
}

impl<G: Gateway> RetryingGateway<G> {
    /// Wrap a gateway with the default policy.
    pub fn new(inner: G) -> Self {
        Self::with_attempts(inner, DEFAULT_SEND_ATTEMPTS)
    }

    /// Wrap a gateway with an explicit attempt count (minimum one).
    pub fn with_attempts(inner: G, attempts: u32) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: Gateway> Gateway for RetryingGateway<G> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<&MessageRef>,
    ) -> ChannelResult<MessageRef> {
        with_retry("send_text", self.attempts, || {
            self.inner.send_text(chat_id, text, reply_to)
        })
        .await
    }

    async fn send_typing(&self, chat_id: ChatId) -> ChannelResult<()> {
        with_retry("send_typing", self.attempts, || self.inner.send_typing(chat_id)).await
    }

    async fn send_media_group(
        &self,
        origin: &MessageRef,
        images: &[OutgoingImage],
        caption: &str,
    ) -> ChannelResult<()> {
        with_retry("send_media_group", self.attempts, || {
            self.inner.send_media_group(origin, images, caption)
        })
        .await
    }

    async fn fetch_file(&self, file_id: &str) -> ChannelResult<Vec<u8>> {
        self.inner.fetch_file(file_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingGateway, Sent};

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let gateway = RetryingGateway::new(RecordingGateway::new());
        gateway.inner().fail_next_sends(1);

        let sent = gateway.send_text(5, "hello", None).await;
        assert!(sent.is_ok());
        assert_eq!(gateway.inner().attempts(), 2);
        assert_eq!(gateway.inner().sent(), vec![Sent::Text { chat_id: 5, text: "hello".into(), reply_to: None }]);
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let gateway = RetryingGateway::new(RecordingGateway::new());
        gateway.inner().fail_next_sends(2);

        let result = gateway.send_typing(5).await;
        assert!(result.is_err());
        assert_eq!(gateway.inner().attempts(), 2);
        assert!(gateway.inner().sent().is_empty());
    }

    #[tokio::test]
    async fn single_attempt_policy() {
        let gateway = RetryingGateway::with_attempts(RecordingGateway::new(), 0);
        gateway.inner().fail_next_sends(1);

        assert!(gateway.send_typing(1).await.is_err());
        assert_eq!(gateway.inner().attempts(), 1);
    }

    #[tokio::test]
    async fn media_group_is_retried() {
        let gateway = RetryingGateway::new(RecordingGateway::new());
        gateway.inner().fail_next_sends(1);

        let images = vec![OutgoingImage {
            data: vec![1, 2, 3],
            filename: "a.png".into(),
        }];
        let origin = MessageRef::new(3, 30);
        gateway
            .send_media_group(&origin, &images, "caption")
            .await
            .unwrap();
        assert_eq!(gateway.inner().media_groups().len(), 1);
    }
}
