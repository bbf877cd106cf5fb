//! Imagen Bot - Telegram front end for OpenAI image generation.
//!
//! Each `/imagen` command runs as its own session task. Edit requests wait
//! for the user to post the images to work on; the dispatcher matches those
//! uploads to the waiting session through the [`SessionRegistry`]. While a
//! request is with the image service the [`TypingCoordinator`] keeps the
//! chat's typing indicator alive.
//!
//! ```text
//! Telegram ─▶ listen ─▶ Dispatcher ─┬─▶ Session ─▶ ImageService
//!                                   │      ▲            │
//!                   uploads ─▶ SessionRegistry          ▼
//! Telegram ◀──────────── RetryingGateway ◀── result / typing
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod command;
pub mod dispatcher;
pub mod imagen;
pub mod message;
pub mod outbound;
pub mod registry;
pub mod session;
pub mod telegram;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod traits;
pub mod typing;

pub use command::{Command, Flag, ImageRequest, Mode};
pub use dispatcher::Dispatcher;
pub use imagen::{ImageService, OpenAiImages, ServiceError};
pub use message::{
    ChatId, CommandMessage, FileUpload, InboundEvent, MessageRef, OutgoingImage, UploadItem, UserId,
};
pub use outbound::RetryingGateway;
pub use registry::{SessionId, SessionKey, SessionRegistry};
pub use session::{CollectTiming, Completion, Session, SessionContext, SessionError, SessionState};
pub use telegram::TelegramChannel;
pub use traits::{ChannelError, ChannelResult, Gateway};
pub use typing::{TypingCoordinator, TypingGuard};

use imagen_common::config::Config;
use imagen_common::util::redact_secret;
use imagen_common::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the inbound event queue between the poller and the dispatcher.
const EVENT_QUEUE_CAPACITY: usize = 100;

const STARTUP_NOTICE: &str = "🤖 Bot started";

/// Run the bot until `shutdown` fires.
pub async fn run_bot(config: &Config, shutdown: CancellationToken) -> imagen_common::Result<()> {
    config.validate()?;

    let bot_token = config
        .bot_token()
        .ok_or_else(|| Error::Config("Telegram bot token not set".into()))?;
    let api_key = config
        .openai_api_key()
        .ok_or_else(|| Error::Config("OpenAI API key not set".into()))?;

    tracing::info!(
        token = %redact_secret(bot_token),
        allowed_users = config.telegram.allowed_user_ids.len(),
        allowed_groups = config.telegram.allowed_group_ids.len(),
        model = %config.openai.model,
        "Starting Imagen bot"
    );

    let telegram = Arc::new(TelegramChannel::new(
        bot_token.to_string(),
        &config.telegram.api_base,
        config.telegram.poll_timeout_secs,
    ));
    telegram
        .init()
        .await
        .map_err(|e| Error::External(e.to_string()).with_context("can't init telegram bot"))?;

    let gateway: Arc<dyn Gateway> = Arc::new(RetryingGateway::with_attempts(
        telegram.clone(),
        config.outbound.send_attempts,
    ));
    let images: Arc<dyn ImageService> = Arc::new(OpenAiImages::with_base_url(
        api_key.to_string(),
        &config.openai.base_url,
        Some(config.openai.model.clone()),
        Duration::from_secs(config.openai.request_timeout_secs),
    ));

    let (typing, typing_task) = TypingCoordinator::spawn(
        gateway.clone(),
        config.typing.refresh_period(),
        shutdown.clone(),
    );

    let ctx = Arc::new(SessionContext {
        gateway: gateway.clone(),
        images,
        registry: Arc::new(SessionRegistry::new()),
        typing,
        timing: CollectTiming {
            upload_timeout: config.session.upload_timeout(),
            settle: config.session.settle(),
        },
    });

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let dispatcher = Dispatcher::new(ctx, config.telegram.clone(), shutdown.clone());
    let dispatcher_task = tokio::spawn(dispatcher.run(events_rx));

    for admin in &config.telegram.admin_user_ids {
        if let Err(e) = gateway.send_text(*admin, STARTUP_NOTICE, None).await {
            tracing::warn!(user_id = admin, error = %e, "Failed to notify admin");
        }
    }

    let listened = telegram.listen(events_tx, shutdown.clone()).await;

    // Stop the coordinator even when polling ended on its own
    if let Err(e) = dispatcher_task.await {
        tracing::error!(error = %e, "Dispatcher task panicked");
    }
    shutdown.cancel();
    if let Err(e) = typing_task.await {
        tracing::error!(error = %e, "Typing coordinator panicked");
    }

    tracing::info!("Imagen bot stopped");
    listened.map_err(|e| Error::External(e.to_string()).with_context("telegram polling failed"))
}
