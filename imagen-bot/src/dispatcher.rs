//! Inbound event dispatcher.
//!
//! Reads the gateway's event stream, applies access control, starts a
//! session task per `imagen` command and routes uploads to waiting sessions.
//! Uploads are downloaded by a single fetch task so they reach a session in
//! the order they were posted.

use crate::command::{help_text, Command, WELCOME_TEXT};
use crate::message::{CommandMessage, FileUpload, InboundEvent, MessageRef, UploadItem};
use crate::registry::SessionKey;
use crate::session::{Session, SessionContext};
use imagen_common::TelegramConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Routes inbound events to sessions.
pub struct Dispatcher {
    ctx: Arc<SessionContext>,
    access: TelegramConfig,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(ctx: Arc<SessionContext>, access: TelegramConfig, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            access,
            shutdown,
        }
    }

    /// Process events until shutdown or until the stream ends, then wait
    /// for running sessions to finish.
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) {
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let fetcher = tokio::spawn(fetch_uploads(
            self.ctx.clone(),
            upload_rx,
            self.shutdown.clone(),
        ));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Session task panicked");
                    }
                }

                event = events.recv() => match event {
                    Some(InboundEvent::Command(command)) => self.handle_command(command, &mut tasks).await,
                    Some(InboundEvent::Upload(upload)) => {
                        if upload_tx.send(upload).is_err() {
                            tracing::error!("Upload fetcher stopped");
                        }
                    }
                    None => break,
                },
            }
        }

        drop(upload_tx);
        tracing::info!(running = tasks.len(), "Dispatcher stopping, waiting for sessions");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Session task panicked");
            }
        }
        if let Err(e) = fetcher.await {
            tracing::error!(error = %e, "Upload fetcher panicked");
        }
    }

    /// Private chats need an allowed user, groups an allowed group.
    fn is_permitted(&self, command: &CommandMessage) -> bool {
        if command.is_private() {
            self.access.is_user_allowed(command.user_id)
        } else {
            self.access.is_group_allowed(command.chat_id())
        }
    }

    async fn handle_command(&self, command: CommandMessage, tasks: &mut JoinSet<()>) {
        if !self.is_permitted(&command) {
            tracing::info!(
                user_id = command.user_id,
                chat_id = command.chat_id(),
                "Sender not allowed, ignoring"
            );
            return;
        }

        match Command::parse(&command.text) {
            Some(Command::Imagen(args)) => self.start_session(command, args, tasks),
            // Plain text in a private chat is a prompt
            None if command.is_private() => {
                let args = command.text.clone();
                self.start_session(command, args, tasks);
            }
            None => {}
            Some(Command::Cancel) => {
                let key = SessionKey::new(command.user_id, command.chat_id());
                if !self.ctx.registry.cancel(key).await {
                    self.reply(tasks, command.message, "❌ Error: no image upload in progress".into());
                }
            }
            Some(Command::Help(prefix)) => self.reply(tasks, command.message, help_text(prefix)),
            Some(Command::Start) if command.is_private() => {
                self.reply(tasks, command.message, WELCOME_TEXT.to_string());
            }
            Some(Command::Unknown(name)) if command.is_private() => {
                tracing::debug!(command = %name, "Invalid command");
                self.reply(tasks, command.message, "❌ Error: invalid command".into());
            }
            Some(Command::Start | Command::Unknown(_)) => {}
        }
    }

    fn start_session(&self, command: CommandMessage, args: String, tasks: &mut JoinSet<()>) {
        let session = Session::new(self.ctx.clone(), &command, args, self.shutdown.child_token());
        tasks.spawn(async move {
            // Failures are reported to the user and logged by the session
            let _ = session.run().await;
        });
    }

    fn reply(&self, tasks: &mut JoinSet<()>, origin: MessageRef, text: String) {
        let gateway = self.ctx.gateway.clone();
        tasks.spawn(async move {
            if let Err(e) = gateway.send_text(origin.chat_id, &text, Some(&origin)).await {
                tracing::warn!(chat_id = origin.chat_id, error = %e, "Failed to send reply");
            }
        });
    }
}

async fn fetch_uploads(
    ctx: Arc<SessionContext>,
    mut uploads: mpsc::UnboundedReceiver<FileUpload>,
    shutdown: CancellationToken,
) {
    while let Some(upload) = uploads.recv().await {
        if shutdown.is_cancelled() {
            break;
        }

        let chat_id = upload.message.chat_id;
        let Some(origin) = ctx.registry.waiting_origin(upload.user_id, chat_id).await else {
            tracing::warn!(user_id = upload.user_id, chat_id, "No session waiting for upload");
            continue;
        };

        let fetched = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            fetched = ctx.gateway.fetch_file(&upload.file_id) => fetched,
        };

        match fetched {
            Ok(data) => {
                let item = UploadItem::from_download(data, upload.file_name.as_deref());
                tracing::debug!(
                    user_id = upload.user_id,
                    filename = item.filename(),
                    mime_type = item.mime_type(),
                    bytes = item.len(),
                    "Upload downloaded"
                );
                ctx.registry.deliver(upload.user_id, chat_id, item).await;
            }
            Err(e) => {
                tracing::error!(file_id = %upload.file_id, error = %e, "Upload download failed");
                let text = format!("❌ Error: {e}");
                if let Err(e) = ctx.gateway.send_text(chat_id, &text, Some(&origin)).await {
                    tracing::warn!(chat_id, error = %e, "Failed to send reply");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use crate::session::CollectTiming;
    use crate::testing::{RecordingGateway, ScriptedImages};
    use crate::typing::TypingCoordinator;
    use std::time::Duration;

    /// Feed `events` through a dispatcher and wait until it has drained them.
    async fn dispatch(events: Vec<InboundEvent>) -> (Arc<RecordingGateway>, Arc<ScriptedImages>) {
        let gateway = Arc::new(RecordingGateway::new());
        let images = Arc::new(ScriptedImages::new());
        let shutdown = CancellationToken::new();
        let (typing, _) =
            TypingCoordinator::spawn(gateway.clone(), Duration::from_secs(4), shutdown.clone());
        let ctx = Arc::new(SessionContext {
            gateway: gateway.clone(),
            images: images.clone(),
            registry: Arc::new(SessionRegistry::new()),
            typing,
            timing: CollectTiming::default(),
        });
        let access = TelegramConfig {
            allowed_user_ids: vec![1],
            allowed_group_ids: vec![-100],
            ..TelegramConfig::default()
        };

        let (tx, rx) = mpsc::channel(16);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        Dispatcher::new(ctx, access, shutdown).run(rx).await;
        (gateway, images)
    }

    fn text(user_id: i64, chat_id: i64, text: &str) -> InboundEvent {
        InboundEvent::Command(CommandMessage {
            user_id,
            username: None,
            message: MessageRef::new(chat_id, 1),
            text: text.into(),
        })
    }

    #[tokio::test]
    async fn ignores_unknown_senders() {
        let (gateway, images) = dispatch(vec![
            text(2, 2, "/imagen a cat"),
            text(1, -200, "/imagen a cat"),
        ])
        .await;

        assert!(gateway.sent().is_empty());
        assert!(images.calls().is_empty());
    }

    #[tokio::test]
    async fn private_text_is_a_prompt() {
        let (gateway, images) = dispatch(vec![text(1, 1, "a red fox")]).await;

        let calls = images.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "a red fox");
        assert_eq!(gateway.media_groups().len(), 1);
    }

    #[tokio::test]
    async fn group_chatter_is_ignored() {
        let (gateway, _) = dispatch(vec![
            text(5, -100, "hello everyone"),
            text(5, -100, "/weather"),
            text(5, -100, "/start"),
        ])
        .await;

        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn answers_help_and_unknown_commands() {
        let (gateway, _) = dispatch(vec![
            text(1, 1, "!imagenhelp"),
            text(1, 1, "/weather"),
            text(1, 1, "/start"),
            text(1, 1, "/imagencancel"),
        ])
        .await;

        let texts = gateway.texts();
        assert_eq!(texts.len(), 4);
        assert!(texts.iter().any(|t| t.contains("!imagen (args) [prompt]")));
        assert!(texts.contains(&"❌ Error: invalid command".to_string()));
        assert!(texts.contains(&WELCOME_TEXT.to_string()));
        assert!(texts.contains(&"❌ Error: no image upload in progress".to_string()));
    }

    #[tokio::test]
    async fn group_commands_are_answered_in_allowed_groups() {
        let (gateway, images) = dispatch(vec![text(5, -100, "/imagen@ImagenBot a cat -size 1536x1024")]).await;

        assert_eq!(images.calls().len(), 1);
        let groups = gateway.media_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].2, "💭 a cat\n🖼️ Size: 1536x1024");
    }
}
