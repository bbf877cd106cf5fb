//! Typing indicator coordination.
//!
//! A single task owns the set of chats with a pending reply and keeps the
//! platform's "typing" indicator alive for each of them. Sessions talk to it
//! through a [`TypingCoordinator`] handle; several sessions in the same chat
//! share one refresh stream.

use crate::message::ChatId;
use crate::traits::Gateway;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Telegram clears the indicator after about five seconds.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(4);

#[derive(Debug)]
enum TypingCommand {
    Assert(ChatId),
    Deassert(ChatId),
}

struct Interest {
    holders: usize,
    next_due: Instant,
}

/// Handle to the typing coordinator task.
#[derive(Clone)]
pub struct TypingCoordinator {
    tx: mpsc::UnboundedSender<TypingCommand>,
}

impl TypingCoordinator {
    /// Start the coordinator task. It stops when `shutdown` fires or every
    /// handle has been dropped.
    pub fn spawn(
        gateway: Arc<dyn Gateway>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx, gateway, period, shutdown));
        (Self { tx }, handle)
    }

    /// Register interest in showing "typing" in `chat_id`.
    pub fn assert(&self, chat_id: ChatId) {
        self.send(TypingCommand::Assert(chat_id));
    }

    /// Drop one unit of interest in `chat_id`.
    pub fn deassert(&self, chat_id: ChatId) {
        self.send(TypingCommand::Deassert(chat_id));
    }

    /// Assert interest for as long as the returned guard lives.
    pub fn hold(&self, chat_id: ChatId) -> TypingGuard {
        self.assert(chat_id);
        TypingGuard {
            coordinator: self.clone(),
            chat_id,
        }
    }

    fn send(&self, command: TypingCommand) {
        if let Err(e) = self.tx.send(command) {
            tracing::debug!(command = ?e.0, "Typing coordinator has stopped");
        }
    }
}

/// Deasserts typing for its chat when dropped.
pub struct TypingGuard {
    coordinator: TypingCoordinator,
    chat_id: ChatId,
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.coordinator.deassert(self.chat_id);
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<TypingCommand>,
    gateway: Arc<dyn Gateway>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut chats: HashMap<ChatId, Interest> = HashMap::new();

    loop {
        let next_due = chats.values().map(|i| i.next_due).min();

        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            command = rx.recv() => match command {
                Some(TypingCommand::Assert(chat_id)) => {
                    if let Some(interest) = chats.get_mut(&chat_id) {
                        interest.holders += 1;
                        continue;
                    }
                    chats.insert(chat_id, Interest {
                        holders: 1,
                        next_due: Instant::now() + period,
                    });
                    signal(gateway.as_ref(), chat_id).await;
                }
                Some(TypingCommand::Deassert(chat_id)) => {
                    let Some(interest) = chats.get_mut(&chat_id) else {
                        tracing::warn!(chat_id, "Typing deasserted for an idle chat");
                        continue;
                    };
                    interest.holders -= 1;
                    if interest.holders == 0 {
                        chats.remove(&chat_id);
                    }
                }
                None => break,
            },

            () = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                let due: Vec<ChatId> = chats
                    .iter()
                    .filter(|(_, i)| i.next_due <= now)
                    .map(|(chat_id, _)| *chat_id)
                    .collect();
                for chat_id in due {
                    if let Some(interest) = chats.get_mut(&chat_id) {
                        interest.next_due = now + period;
                    }
                    signal(gateway.as_ref(), chat_id).await;
                }
            }
        }
    }

    tracing::debug!(active_chats = chats.len(), "Typing coordinator stopped");
}

async fn signal(gateway: &dyn Gateway, chat_id: ChatId) {
    if let Err(e) = gateway.send_typing(chat_id).await {
        tracing::warn!(chat_id, error = %e, "Failed to send typing indicator");
    }
}
