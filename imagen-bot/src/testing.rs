//! In-memory collaborators for exercising sessions without network access.
//!
//! [`RecordingGateway`] records every outbound call and serves files from a
//! local store. [`ScriptedImages`] answers image requests from a queue.

use crate::command::{ImageRequest, Mode};
use crate::imagen::{ImageService, ServiceError};
use crate::message::{ChatId, MessageRef, OutgoingImage, UploadItem};
use crate::traits::{ChannelError, ChannelResult, Gateway};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// PNG signature, enough for type sniffing.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A successful outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        chat_id: ChatId,
        text: String,
        reply_to: Option<MessageRef>,
    },
    MediaGroup {
        origin: MessageRef,
        images: Vec<OutgoingImage>,
        caption: String,
    },
}

#[derive(Default)]
struct GatewayState {
    sent: Vec<Sent>,
    typing: Vec<(ChatId, Instant)>,
    attempts: usize,
    fail_next: usize,
    fail_media: bool,
    files: HashMap<String, Vec<u8>>,
    next_message_id: i64,
}

impl GatewayState {
    /// Count an attempt and consume a scripted failure if one is pending.
    fn attempt(&mut self) -> ChannelResult<()> {
        self.attempts += 1;
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(ChannelError::SendFailed("scripted failure".into()));
        }
        Ok(())
    }
}

/// Gateway that records outbound traffic.
#[derive(Default)]
pub struct RecordingGateway {
    state: Mutex<GatewayState>,
    fetch_latency: Duration,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every file download by `latency`.
    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = latency;
        self
    }

    /// Make the next `count` send attempts fail, whatever their kind.
    pub fn fail_next_sends(&self, count: usize) {
        lock(&self.state).fail_next = count;
    }

    /// Make every media group send fail.
    pub fn fail_media_groups(&self, fail: bool) {
        lock(&self.state).fail_media = fail;
    }

    /// Register a downloadable file.
    pub fn add_file(&self, file_id: impl Into<String>, data: Vec<u8>) {
        lock(&self.state).files.insert(file_id.into(), data);
    }

    /// Total send attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    pub fn sent(&self) -> Vec<Sent> {
        lock(&self.state).sent.clone()
    }

    /// Text bodies of every text message sent.
    pub fn texts(&self) -> Vec<String> {
        lock(&self.state)
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text.clone()),
                Sent::MediaGroup { .. } => None,
            })
            .collect()
    }

    pub fn media_groups(&self) -> Vec<(MessageRef, Vec<OutgoingImage>, String)> {
        lock(&self.state)
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::MediaGroup {
                    origin,
                    images,
                    caption,
                } => Some((*origin, images.clone(), caption.clone())),
                Sent::Text { .. } => None,
            })
            .collect()
    }

    /// Typing signals sent to `chat_id`, with the time each was sent.
    pub fn typing_times(&self, chat_id: ChatId) -> Vec<Instant> {
        lock(&self.state)
            .typing
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn typing_count(&self, chat_id: ChatId) -> usize {
        self.typing_times(chat_id).len()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<&MessageRef>,
    ) -> ChannelResult<MessageRef> {
        let mut state = lock(&self.state);
        state.attempt()?;
        state.sent.push(Sent::Text {
            chat_id,
            text: text.to_string(),
            reply_to: reply_to.copied(),
        });
        state.next_message_id += 1;
        Ok(MessageRef::new(chat_id, 10_000 + state.next_message_id))
    }

    async fn send_typing(&self, chat_id: ChatId) -> ChannelResult<()> {
        let mut state = lock(&self.state);
        state.attempt()?;
        state.typing.push((chat_id, Instant::now()));
        Ok(())
    }

    async fn send_media_group(
        &self,
        origin: &MessageRef,
        images: &[OutgoingImage],
        caption: &str,
    ) -> ChannelResult<()> {
        let mut state = lock(&self.state);
        state.attempt()?;
        if state.fail_media {
            return Err(ChannelError::SendFailed("media rejected".into()));
        }
        state.sent.push(Sent::MediaGroup {
            origin: *origin,
            images: images.to_vec(),
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn fetch_file(&self, file_id: &str) -> ChannelResult<Vec<u8>> {
        let file = lock(&self.state).files.get(file_id).cloned();
        if !self.fetch_latency.is_zero() {
            tokio::time::sleep(self.fetch_latency).await;
        }
        file.ok_or_else(|| ChannelError::Download(format!("no such file: {file_id}")))
    }
}

/// One call received by [`ScriptedImages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCall {
    pub mode: Mode,
    pub prompt: String,
    /// File names of the images passed to an edit
    pub inputs: Vec<String>,
}

/// Image service answering from a queue of scripted results.
///
/// With an empty queue every call returns a single PNG.
#[derive(Default)]
pub struct ScriptedImages {
    responses: Mutex<VecDeque<Result<Vec<Vec<u8>>, ServiceError>>>,
    calls: Mutex<Vec<ImageCall>>,
    latency: Duration,
}

impl ScriptedImages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_response(&self, response: Result<Vec<Vec<u8>>, ServiceError>) {
        lock(&self.responses).push_back(response);
    }

    pub fn calls(&self) -> Vec<ImageCall> {
        lock(&self.calls).clone()
    }

    async fn answer(&self, call: ImageCall) -> Result<Vec<Vec<u8>>, ServiceError> {
        lock(&self.calls).push(call);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(vec![PNG_BYTES.to_vec()]))
    }
}

#[async_trait]
impl ImageService for ScriptedImages {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ImageRequest) -> Result<Vec<Vec<u8>>, ServiceError> {
        self.answer(ImageCall {
            mode: Mode::Generate,
            prompt: request.prompt.clone(),
            inputs: Vec::new(),
        })
        .await
    }

    async fn edit(
        &self,
        request: &ImageRequest,
        images: &[UploadItem],
    ) -> Result<Vec<Vec<u8>>, ServiceError> {
        self.answer(ImageCall {
            mode: Mode::Edit,
            prompt: request.prompt.clone(),
            inputs: images.iter().map(|i| i.filename().to_string()).collect(),
        })
        .await
    }
}
