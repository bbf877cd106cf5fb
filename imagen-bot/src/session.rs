//! Per-command session lifecycle.
//!
//! A [`Session`] handles one `imagen` command from parsing to delivering
//! the result. Edit requests first wait for the user to post images:
//!
//! ```text
//! Parsing ──▶ AwaitingUploads ──▶ Processing ──▶ Completed
//!    │               │                 │
//!    └───────────────┴─────────────────┴──────▶ Failed
//! ```
//!
//! Upload collection uses two timers. The upload timeout runs from the
//! moment the session starts waiting and is never restarted. The settle
//! window restarts on every upload and, once it elapses with at least one
//! image collected, closes the batch.

use crate::command::ImageRequest;
use crate::imagen::{ImageService, ServiceError};
use crate::message::{CommandMessage, MessageRef, OutgoingImage, UploadItem};
use crate::registry::{SessionId, SessionKey, SessionRegistry, UploadInbox};
use crate::traits::{ChannelError, Gateway};
use crate::typing::TypingCoordinator;
use imagen_common::util::truncate_with_ellipsis;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Telegram's caption limit.
const MAX_CAPTION_CHARS: usize = 1024;

const ERROR_PREFIX: &str = "❌ Error";

const UPLOAD_PROMPT: &str = "🩻 Please post the image file(s) to process.";

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Parsing,
    AwaitingUploads,
    Processing,
    Completed,
    Failed,
}

impl SessionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::AwaitingUploads => "awaiting_uploads",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Parsing, AwaitingUploads)
                | (Parsing, Processing)
                | (AwaitingUploads, Processing)
                | (Processing, Completed)
                | (Parsing | AwaitingUploads | Processing, Failed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session failed. Displayed to the user after "❌ Error: ".
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    MalformedArguments(String),

    #[error("Missing value for flag: {0}")]
    MissingValue(String),

    #[error("waiting for image data timeout")]
    UploadTimeout,

    #[error("got no image data")]
    NoUploads,

    #[error("cancelled")]
    Cancelled,

    /// The image service failed; holds its own error text.
    #[error("{0}")]
    Downstream(String),

    #[error("can't encode request: {0}")]
    Encode(String),

    #[error("can't send images: {0}")]
    Delivery(#[source] ChannelError),

    #[error("already waiting for your images in this chat, use imagencancel to abort")]
    AlreadyWaiting,
}

impl SessionError {
    /// Stable identifier for logs and tests.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedArguments(_) => "malformed-arguments",
            Self::MissingValue(_) => "missing-required-value",
            Self::UploadTimeout => "upload-timeout",
            Self::NoUploads => "zero-uploads-received",
            Self::Cancelled => "cancelled",
            Self::Downstream(_) => "downstream-service-error",
            Self::Encode(_) => "encode-error",
            Self::Delivery(_) => "delivery-error",
            Self::AlreadyWaiting => "already-waiting",
        }
    }
}

impl From<ServiceError> for SessionError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Encode(msg) => Self::Encode(msg),
            other => Self::Downstream(other.to_string()),
        }
    }
}

/// Upload collection timers.
#[derive(Debug, Clone, Copy)]
pub struct CollectTiming {
    /// Overall limit for the collection window
    pub upload_timeout: Duration,
    /// Quiet period after an upload that closes the batch
    pub settle: Duration,
}

impl Default for CollectTiming {
    fn default() -> Self {
        Self {
            upload_timeout: Duration::from_secs(180),
            settle: Duration::from_secs(1),
        }
    }
}

/// Collaborators shared by all sessions.
pub struct SessionContext {
    pub gateway: Arc<dyn Gateway>,
    pub images: Arc<dyn ImageService>,
    pub registry: Arc<SessionRegistry>,
    pub typing: TypingCoordinator,
    pub timing: CollectTiming,
}

/// What a completed session produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub uploads: usize,
    pub images: usize,
}

/// One `imagen` command invocation.
pub struct Session {
    id: SessionId,
    key: SessionKey,
    origin: MessageRef,
    args: String,
    state: SessionState,
    cancel: CancellationToken,
    ctx: Arc<SessionContext>,
}

impl Session {
    /// Create a session for `command`; `args` is the text after the command word.
    pub fn new(
        ctx: Arc<SessionContext>,
        command: &CommandMessage,
        args: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: SessionId::new(),
            key: SessionKey::new(command.user_id, command.chat_id()),
            origin: command.message,
            args: args.into(),
            state: SessionState::Parsing,
            cancel,
            ctx,
        }
    }

    /// Drive the session to a terminal state. Failures are reported to the
    /// user before returning.
    pub async fn run(mut self) -> Result<Completion, SessionError> {
        tracing::info!(
            session_id = %self.id,
            user_id = self.key.user_id,
            chat_id = self.key.chat_id,
            "Session started"
        );

        let result = self.drive().await;
        match &result {
            Ok(completion) => {
                self.transition(SessionState::Completed);
                tracing::info!(
                    session_id = %self.id,
                    uploads = completion.uploads,
                    images = completion.images,
                    "Session completed"
                );
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                tracing::warn!(
                    session_id = %self.id,
                    error_kind = e.kind(),
                    error = %e,
                    "Session failed"
                );
                self.reply(&format!("{ERROR_PREFIX}: {e}")).await;
            }
        }
        result
    }

    async fn drive(&mut self) -> Result<Completion, SessionError> {
        let request = ImageRequest::parse(&self.args)?;
        tracing::debug!(
            session_id = %self.id,
            mode = ?request.mode,
            count = request.count,
            size = %request.size,
            "Request parsed"
        );

        let uploads = if request.needs_uploads() {
            self.transition(SessionState::AwaitingUploads);
            self.collect_uploads().await?
        } else {
            Vec::new()
        };

        self.transition(SessionState::Processing);
        let images = self.process(&request, &uploads).await?;
        let count = images.len();
        self.deliver(&request, images).await?;

        Ok(Completion {
            uploads: uploads.len(),
            images: count,
        })
    }

    async fn collect_uploads(&mut self) -> Result<Vec<UploadItem>, SessionError> {
        let deadline = Instant::now() + self.ctx.timing.upload_timeout;
        let mut inbox = self
            .ctx
            .registry
            .register(self.id, self.key, self.origin, self.cancel.clone())
            .await?;
        self.reply(UPLOAD_PROMPT).await;

        let mut items = Vec::new();
        let end = collect(
            &mut inbox,
            &self.cancel,
            deadline,
            self.ctx.timing.settle,
            &mut items,
        )
        .await;

        // Stop accepting uploads, then pick up anything delivered before the close
        self.ctx.registry.unregister(self.id, self.key).await;
        inbox.close();
        while let Ok(item) = inbox.try_recv() {
            items.push(item);
        }

        tracing::debug!(session_id = %self.id, ?end, collected = items.len(), "Upload window closed");
        match end {
            CollectEnd::Cancelled => {
                if !items.is_empty() {
                    tracing::info!(session_id = %self.id, dropped = items.len(), "Uploads discarded on cancel");
                }
                Err(SessionError::Cancelled)
            }
            _ if !items.is_empty() => Ok(items),
            CollectEnd::Deadline => Err(SessionError::UploadTimeout),
            CollectEnd::Settled | CollectEnd::Closed => Err(SessionError::NoUploads),
        }
    }

    async fn process(
        &self,
        request: &ImageRequest,
        uploads: &[UploadItem],
    ) -> Result<Vec<Vec<u8>>, SessionError> {
        let _typing = self.ctx.typing.hold(self.key.chat_id);

        let call = async {
            if request.needs_uploads() {
                self.ctx.images.edit(request, uploads).await
            } else {
                self.ctx.images.generate(request).await
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                tracing::info!(session_id = %self.id, "Image request abandoned");
                Err(SessionError::Cancelled)
            }
            result = call => {
                if let Err(e) = &result {
                    tracing::error!(
                        session_id = %self.id,
                        provider = self.ctx.images.provider_name(),
                        error = %e,
                        "Image service failed"
                    );
                }
                Ok(result?)
            }
        }
    }

    async fn deliver(&self, request: &ImageRequest, images: Vec<Vec<u8>>) -> Result<(), SessionError> {
        let stamp = chrono::Local::now().format("%y%m%d-%H%M%S");
        let outgoing: Vec<OutgoingImage> = images
            .into_iter()
            .enumerate()
            .map(|(i, data)| OutgoingImage {
                data,
                filename: if i == 0 {
                    format!("imagen-{stamp}.png")
                } else {
                    format!("imagen-{stamp}-{}.png", i + 1)
                },
            })
            .collect();

        self.ctx
            .gateway
            .send_media_group(&self.origin, &outgoing, &build_caption(request))
            .await
            .map_err(SessionError::Delivery)
    }

    /// Status reply. Failures are logged and otherwise ignored.
    async fn reply(&self, text: &str) {
        if let Err(e) = self
            .ctx
            .gateway
            .send_text(self.origin.chat_id, text, Some(&self.origin))
            .await
        {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to send status reply");
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid session transition {} -> {next}",
            self.state
        );
        tracing::debug!(session_id = %self.id, from = %self.state, state = %next, "Session state changed");
        self.state = next;
    }
}

/// How an upload collection window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectEnd {
    Settled,
    Deadline,
    Closed,
    Cancelled,
}

async fn collect(
    inbox: &mut UploadInbox,
    cancel: &CancellationToken,
    deadline: Instant,
    settle: Duration,
    items: &mut Vec<UploadItem>,
) -> CollectEnd {
    let mut settle_at: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return CollectEnd::Cancelled,

            item = inbox.recv() => match item {
                Some(item) => {
                    items.push(item);
                    settle_at = Some(Instant::now() + settle);
                }
                None => return CollectEnd::Closed,
            },

            () = sleep_until(settle_at.unwrap_or(deadline)), if settle_at.is_some() => {
                return CollectEnd::Settled;
            }

            () = sleep_until(deadline) => return CollectEnd::Deadline,
        }
    }
}

/// Result caption: the prompt, plus the explicitly set image options.
pub fn build_caption(request: &ImageRequest) -> String {
    use crate::command::Flag;

    let mut caption = format!("💭 {}", request.prompt);
    let details: Vec<String> = request
        .explicit
        .iter()
        .filter_map(|flag| match flag {
            Flag::Size => Some(format!("Size: {}", request.size)),
            Flag::Background => Some(format!("Background: {}", request.background)),
            Flag::Quality => Some(format!("Quality: {}", request.quality)),
            Flag::Count => None,
        })
        .collect();
    if !details.is_empty() {
        caption.push_str("\n🖼️ ");
        caption.push_str(&details.join(" "));
    }
    truncate_with_ellipsis(&caption, MAX_CAPTION_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PNG_BYTES;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    fn upload(name: &str) -> UploadItem {
        UploadItem::from_download(PNG_BYTES.to_vec(), Some(name))
    }

    #[test]
    fn state_transitions() {
        use SessionState::*;
        assert!(Parsing.can_transition_to(AwaitingUploads));
        assert!(Parsing.can_transition_to(Processing));
        assert!(AwaitingUploads.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(!AwaitingUploads.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(AwaitingUploads));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn error_kinds_and_text() {
        assert_eq!(SessionError::UploadTimeout.kind(), "upload-timeout");
        assert_eq!(SessionError::NoUploads.kind(), "zero-uploads-received");
        let err = SessionError::from(ServiceError::Api {
            status: 400,
            message: "Invalid size".into(),
        });
        assert_eq!(err.kind(), "downstream-service-error");
        assert_eq!(err.to_string(), "Invalid size");
        let err = SessionError::from(ServiceError::Encode("bad mime".into()));
        assert_eq!(err.kind(), "encode-error");
    }

    #[test]
    fn caption_lists_explicit_options() {
        let request = ImageRequest::parse("a fox -quality high -n 2 -size 1536x1024").unwrap();
        assert_eq!(
            build_caption(&request),
            "💭 a fox\n🖼️ Quality: high Size: 1536x1024"
        );

        let request = ImageRequest::parse("a fox -n 2").unwrap();
        assert_eq!(build_caption(&request), "💭 a fox");
    }

    #[test]
    fn caption_is_truncated() {
        let request = ImageRequest::parse(&"word ".repeat(400)).unwrap();
        let caption = build_caption(&request);
        assert_eq!(caption.chars().count(), MAX_CAPTION_CHARS);
        assert!(caption.ends_with("..."));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_collected_until_settled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let deadline = start + Duration::from_secs(180);

        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            tx.send(upload("a")).unwrap();
            sleep(Duration::from_millis(600)).await;
            tx.send(upload("b")).unwrap();
            sleep(Duration::from_secs(60)).await;
            drop(tx);
        });

        let mut items = Vec::new();
        let end = collect(&mut rx, &cancel, deadline, Duration::from_secs(1), &mut items).await;
        assert_eq!(end, CollectEnd::Settled);
        assert_eq!(items.len(), 2);
        // settled one second after the second upload
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(6600) && elapsed < Duration::from_millis(6700));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_without_uploads() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<UploadItem>();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut items = Vec::new();
        let end = collect(
            &mut rx,
            &cancel,
            start + Duration::from_secs(180),
            Duration::from_secs(1),
            &mut items,
        )
        .await;
        assert_eq!(end, CollectEnd::Deadline);
        assert!(items.is_empty());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(180) && elapsed < Duration::from_secs(181));
    }

    #[tokio::test(start_paused = true)]
    async fn trickled_uploads_cannot_extend_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(500)).await;
                if tx.send(upload("drip")).is_err() {
                    break;
                }
            }
        });

        let mut items = Vec::new();
        let end = collect(
            &mut rx,
            &cancel,
            start + Duration::from_secs(10),
            Duration::from_secs(1),
            &mut items,
        )
        .await;
        assert_eq!(end, CollectEnd::Deadline);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
        assert!(!items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_wait() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<UploadItem>();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let mut items = Vec::new();
        let end = collect(
            &mut rx,
            &cancel,
            Instant::now() + Duration::from_secs(180),
            Duration::from_secs(1),
            &mut items,
        )
        .await;
        assert_eq!(end, CollectEnd::Cancelled);
    }

    #[tokio::test]
    async fn closed_inbox_ends_wait() {
        let (tx, mut rx) = mpsc::unbounded_channel::<UploadItem>();
        drop(tx);
        let mut items = Vec::new();
        let end = collect(
            &mut rx,
            &CancellationToken::new(),
            Instant::now() + Duration::from_secs(180),
            Duration::from_secs(1),
            &mut items,
        )
        .await;
        assert_eq!(end, CollectEnd::Closed);
    }
}
