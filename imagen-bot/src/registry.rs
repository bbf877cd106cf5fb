//! Registry of sessions waiting for uploads.
//!
//! Sessions register only while they are collecting uploads, keyed by the
//! (user, chat) pair that issued the command. The dispatcher routes each
//! downloaded upload through [`SessionRegistry::deliver`].

use crate::message::{ChatId, MessageRef, UploadItem, UserId};
use crate::session::SessionError;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique id of one command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a waiting session accepts uploads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: UserId,
    pub chat_id: ChatId,
}

impl SessionKey {
    pub const fn new(user_id: UserId, chat_id: ChatId) -> Self {
        Self { user_id, chat_id }
    }
}

/// Receiving side of a session's upload inbox.
pub type UploadInbox = mpsc::UnboundedReceiver<UploadItem>;

struct WaitingSession {
    id: SessionId,
    origin: MessageRef,
    sender: mpsc::UnboundedSender<UploadItem>,
    cancel: CancellationToken,
}

/// Sessions currently in the upload-collection state.
#[derive(Default)]
pub struct SessionRegistry {
    waiting: Mutex<HashMap<SessionKey, WaitingSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session that is starting to wait for uploads and get its
    /// inbox.
    ///
    /// Fails with [`SessionError::AlreadyWaiting`] if another session for the
    /// same key is still waiting.
    pub async fn register(
        &self,
        id: SessionId,
        key: SessionKey,
        origin: MessageRef,
        cancel: CancellationToken,
    ) -> Result<UploadInbox, SessionError> {
        let mut waiting = self.waiting.lock().await;
        if waiting.contains_key(&key) {
            return Err(SessionError::AlreadyWaiting);
        }

        let (sender, inbox) = mpsc::unbounded_channel();
        waiting.insert(
            key,
            WaitingSession {
                id,
                origin,
                sender,
                cancel,
            },
        );
        tracing::debug!(session_id = %id, user_id = key.user_id, chat_id = key.chat_id, "Session registered");
        Ok(inbox)
    }

    /// Remove a session. Unknown ids are ignored, as is an entry under the
    /// same key that belongs to another session.
    pub async fn unregister(&self, id: SessionId, key: SessionKey) {
        let mut waiting = self.waiting.lock().await;
        if waiting.get(&key).is_some_and(|w| w.id == id) {
            waiting.remove(&key);
            tracing::debug!(session_id = %id, "Session unregistered");
        }
    }

    /// Hand an upload to the session waiting for `uploader` in `chat_id`.
    ///
    /// Returns false if no session is waiting or its inbox is already closed;
    /// the item is dropped in that case.
    pub async fn deliver(&self, uploader: UserId, chat_id: ChatId, item: UploadItem) -> bool {
        let key = SessionKey::new(uploader, chat_id);
        let sender = {
            let waiting = self.waiting.lock().await;
            waiting.get(&key).map(|w| (w.id, w.sender.clone()))
        };

        let Some((id, sender)) = sender else {
            tracing::warn!(user_id = uploader, chat_id, "No session waiting for upload");
            return false;
        };

        let bytes = item.len();
        match sender.send(item) {
            Ok(()) => {
                tracing::debug!(session_id = %id, bytes, "Upload delivered");
                true
            }
            Err(_) => {
                tracing::warn!(session_id = %id, "Session stopped accepting uploads");
                false
            }
        }
    }

    /// The command message of the session waiting for `uploader` in `chat_id`.
    pub async fn waiting_origin(&self, uploader: UserId, chat_id: ChatId) -> Option<MessageRef> {
        self.waiting
            .lock()
            .await
            .get(&SessionKey::new(uploader, chat_id))
            .map(|w| w.origin)
    }

    /// Cancel the session waiting under `key`. The session unregisters itself.
    pub async fn cancel(&self, key: SessionKey) -> bool {
        match self.waiting.lock().await.get(&key) {
            Some(w) => {
                w.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn waiting_count(&self) -> usize {
        self.waiting.lock().await.len()
    }
}
