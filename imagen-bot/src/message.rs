//! Message types exchanged with the messaging gateway.

use serde::{Deserialize, Serialize};

/// Telegram user identifier.
pub type UserId = i64;

/// Telegram chat identifier. Private chats are positive, groups negative.
pub type ChatId = i64;

/// Reference to a message a reply can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
    /// Forum topic the message was posted in
    #[serde(default)]
    pub thread_id: Option<i64>,
}

impl MessageRef {
    pub const fn new(chat_id: ChatId, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
            thread_id: None,
        }
    }
}

/// A text message that may carry a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub user_id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    pub message: MessageRef,
    pub text: String,
}

impl CommandMessage {
    pub const fn chat_id(&self) -> ChatId {
        self.message.chat_id
    }

    /// Private chats have non-negative ids.
    pub const fn is_private(&self) -> bool {
        self.message.chat_id >= 0
    }
}

/// A document or photo posted to a chat, not yet downloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    pub user_id: UserId,
    pub message: MessageRef,
    /// Gateway file handle used for download
    pub file_id: String,
    /// Name declared by the sender, if any
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Inbound event delivered by the gateway, in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    Command(CommandMessage),
    Upload(FileUpload),
}

/// A downloaded file handed to a waiting session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    data: Vec<u8>,
    mime_type: String,
    filename: String,
}

impl UploadItem {
    /// Build an item from downloaded bytes and the sender's declared file name.
    ///
    /// The MIME type is sniffed from the content. When the declared name has
    /// no extension, one matching the sniffed type is appended.
    pub fn from_download(data: Vec<u8>, declared_name: Option<&str>) -> Self {
        let (mime_type, extension) = sniff_image_type(&data);
        let declared = declared_name.filter(|n| !n.is_empty());
        let mut filename = declared.unwrap_or("image").to_string();
        if !declared.is_some_and(|n| n.contains('.')) {
            filename.push_str(extension);
        }

        Self {
            data,
            mime_type: mime_type.to_string(),
            filename,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Detect the image formats accepted by the edit endpoint.
///
/// Returns the MIME type and the file extension to use for it.
pub fn sniff_image_type(data: &[u8]) -> (&'static str, &'static str) {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = b"\xff\xd8\xff";

    if data.starts_with(PNG) {
        ("image/png", ".png")
    } else if data.starts_with(JPEG) {
        ("image/jpeg", ".jpg")
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        ("image/webp", ".webp")
    } else {
        ("application/octet-stream", ".bin")
    }
}

/// A generated image ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingImage {
    pub data: Vec<u8>,
    pub filename: String,
}
