//! Telegram Bot API adapter.
//!
//! Long-polls `getUpdates` for inbound events and implements [`Gateway`]
//! for replies, typing indicators, result albums and file downloads.

use crate::message::{ChatId, CommandMessage, FileUpload, InboundEvent, MessageRef, OutgoingImage};
use crate::traits::{ChannelError, ChannelResult, Gateway};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Telegram accepts at most this many items in one album.
const MAX_MEDIA_GROUP: usize = 10;

/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel - long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel against `api_base`
    /// (normally `https://api.telegram.org`).
    pub fn new(bot_token: String, api_base: &str, poll_timeout_secs: u64) -> Self {
        Self {
            bot_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            poll_timeout_secs,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(poll_timeout_secs + 30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.bot_token)
    }

    /// Verify the bot token. Returns the bot's username.
    pub async fn init(&self) -> ChannelResult<String> {
        let me = self.call_json("getMe", &serde_json::json!({})).await?;
        let username = me
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        tracing::info!(bot = %username, "Telegram channel initialized");
        Ok(username)
    }

    async fn call_json(&self, method: &str, body: &Value) -> ChannelResult<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        Self::unwrap_result(method, resp).await
    }

    async fn call_multipart(&self, method: &str, form: Form) -> ChannelResult<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        Self::unwrap_result(method, resp).await
    }

    /// Map a Bot API response envelope to its `result` or an error.
    async fn unwrap_result(method: &str, resp: reqwest::Response) -> ChannelResult<Value> {
        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(format!("{method}: {e}")))?;

        if status.is_success() && data.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("result").cloned().unwrap_or(Value::Null));
        }

        let description = data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();

        match status.as_u16() {
            401 | 403 if method == "getMe" => Err(ChannelError::Auth(description)),
            429 => Err(ChannelError::RateLimited {
                retry_after_secs: data
                    .pointer("/parameters/retry_after")
                    .and_then(Value::as_u64)
                    .unwrap_or(1),
            }),
            _ => Err(ChannelError::SendFailed(format!("Telegram {method} failed: {description}"))),
        }
    }

    async fn send_photo(
        &self,
        origin: &MessageRef,
        image: &OutgoingImage,
        caption: &str,
    ) -> ChannelResult<()> {
        let part = Part::bytes(image.data.clone())
            .file_name(image.filename.clone())
            .mime_str("image/png")
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let mut form = Form::new()
            .text("chat_id", origin.chat_id.to_string())
            .part("photo", part);
        if let Some(thread_id) = origin.thread_id {
            form = form.text("message_thread_id", thread_id.to_string());
        }
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }

        self.call_multipart("sendPhoto", form).await?;
        Ok(())
    }

    async fn send_album(
        &self,
        origin: &MessageRef,
        images: &[OutgoingImage],
        caption: Option<&str>,
    ) -> ChannelResult<()> {
        let mut media = Vec::with_capacity(images.len());
        let mut form = Form::new().text("chat_id", origin.chat_id.to_string());
        if let Some(thread_id) = origin.thread_id {
            form = form.text("message_thread_id", thread_id.to_string());
        }

        for (i, image) in images.iter().enumerate() {
            let attach = format!("file{i}");
            let mut item = serde_json::json!({
                "type": "photo",
                "media": format!("attach://{attach}"),
            });
            if i == 0 {
                if let Some(caption) = caption.filter(|c| !c.is_empty()) {
                    item["caption"] = Value::String(caption.to_string());
                }
            }
            media.push(item);

            let part = Part::bytes(image.data.clone())
                .file_name(image.filename.clone())
                .mime_str("image/png")
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            form = form.part(attach, part);
        }

        form = form.text("media", Value::Array(media).to_string());
        self.call_multipart("sendMediaGroup", form).await?;
        Ok(())
    }

    /// Poll for updates until `shutdown` fires or `events` is closed.
    pub async fn listen(
        &self,
        events: mpsc::Sender<InboundEvent>,
        shutdown: CancellationToken,
    ) -> ChannelResult<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"],
            });

            let updates = tokio::select! {
                () = shutdown.cancelled() => break,
                result = self.call_json("getUpdates", &body) => result,
            };

            let updates = match updates {
                Ok(Value::Array(updates)) => updates,
                Ok(other) => {
                    tracing::warn!(response = %other, "Unexpected getUpdates result");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Telegram poll error");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                    }
                }
            };

            for update in &updates {
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(event) = parse_update(update) else {
                    continue;
                };
                if events.send(event).await.is_err() {
                    tracing::info!("Event receiver closed, stopping Telegram poll");
                    return Ok(());
                }
            }
        }

        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

/// Turn a raw update into an inbound event.
///
/// Documents and photos become uploads, whether or not they carry a caption.
/// Messages with text become commands. Everything else is ignored.
pub fn parse_update(update: &Value) -> Option<InboundEvent> {
    let message = update.get("message")?;
    let chat_id = message.pointer("/chat/id").and_then(Value::as_i64)?;
    let message_id = message.get("message_id").and_then(Value::as_i64)?;
    let user_id = message.pointer("/from/id").and_then(Value::as_i64)?;
    let thread_id = message.get("message_thread_id").and_then(Value::as_i64);

    let reference = MessageRef {
        chat_id,
        message_id,
        thread_id,
    };

    if let Some(doc) = message.get("document") {
        let file_id = doc.get("file_id").and_then(Value::as_str)?;
        return Some(InboundEvent::Upload(FileUpload {
            user_id,
            message: reference,
            file_id: file_id.to_string(),
            file_name: doc.get("file_name").and_then(Value::as_str).map(String::from),
        }));
    }

    // Telegram lists photo sizes smallest first
    if let Some(largest) = message
        .get("photo")
        .and_then(Value::as_array)
        .and_then(|sizes| sizes.last())
    {
        let file_id = largest.get("file_id").and_then(Value::as_str)?;
        return Some(InboundEvent::Upload(FileUpload {
            user_id,
            message: reference,
            file_id: file_id.to_string(),
            file_name: largest
                .get("file_unique_id")
                .and_then(Value::as_str)
                .map(String::from),
        }));
    }

    let text = message.get("text").and_then(Value::as_str)?;
    if text.is_empty() {
        return None;
    }

    let username = message
        .pointer("/from/username")
        .and_then(Value::as_str)
        .map(String::from);
    tracing::info!(
        channel = "telegram",
        user_id,
        username = username.as_deref().unwrap_or("unknown"),
        chat_id,
        text = %text,
        "IM message received"
    );

    Some(InboundEvent::Command(CommandMessage {
        user_id,
        username,
        message: reference,
        text: text.to_string(),
    }))
}

#[async_trait]
impl Gateway for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<&MessageRef>,
    ) -> ChannelResult<MessageRef> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(origin) = reply_to {
            body["reply_parameters"] = serde_json::json!({ "message_id": origin.message_id });
            if let Some(thread_id) = origin.thread_id {
                body["message_thread_id"] = thread_id.into();
            }
        }

        let sent = self.call_json("sendMessage", &body).await?;
        let message_id = sent
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChannelError::InvalidResponse("sendMessage: missing message_id".into()))?;

        Ok(MessageRef {
            chat_id,
            message_id,
            thread_id: sent.get("message_thread_id").and_then(Value::as_i64),
        })
    }

    async fn send_typing(&self, chat_id: ChatId) -> ChannelResult<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "action": "typing",
        });
        self.call_json("sendChatAction", &body).await?;
        Ok(())
    }

    async fn send_media_group(
        &self,
        origin: &MessageRef,
        images: &[OutgoingImage],
        caption: &str,
    ) -> ChannelResult<()> {
        match images {
            [] => Err(ChannelError::SendFailed("no images to send".into())),
            [single] => self.send_photo(origin, single, caption).await,
            _ => {
                for (i, chunk) in images.chunks(MAX_MEDIA_GROUP).enumerate() {
                    let caption = (i == 0).then_some(caption);
                    match chunk {
                        // Albums need at least two items
                        [single] => self.send_photo(origin, single, caption.unwrap_or("")).await?,
                        _ => self.send_album(origin, chunk, caption).await?,
                    }
                }
                tracing::info!(chat_id = origin.chat_id, count = images.len(), "Telegram album sent");
                Ok(())
            }
        }
    }

    async fn fetch_file(&self, file_id: &str) -> ChannelResult<Vec<u8>> {
        let file = self
            .call_json("getFile", &serde_json::json!({ "file_id": file_id }))
            .await
            .map_err(|e| ChannelError::Download(format!("can't get file: {e}")))?;

        let file_path = file
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Download("missing file_path in getFile response".into()))?;

        let resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| ChannelError::Download(format!("can't download file: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChannelError::Download(format!(
                "can't download file: {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ChannelError::Download(format!("can't read file: {e}")))?;
        Ok(bytes.to_vec())
    }
}
