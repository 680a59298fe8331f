//! Wire and persistence shapes for chat messages.
//!
//! Two fixed JSON shapes live here:
//!
//! - [`ClientFrame`] — what a client sends over its WebSocket, one JSON
//!   object per frame, discriminated by `"type"` (`chat` | `code` | `file`).
//! - [`StoredMessage`] — what the store persists and what every recipient
//!   session receives verbatim as the fan-out payload.
//!
//! The inbound `"chat"` frame becomes a persisted `"text"` message; `code`
//! and `file` keep their names. Content is kind-specific and empty fields
//! are omitted from the serialized form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, MessageId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Inbound frames
// ─────────────────────────────────────────────────────────────────────────────

/// One decoded inbound WebSocket frame.
///
/// Transient: consumed immediately by the ingest path. A frame that fails to
/// decode into this shape is logged and skipped without closing the
/// connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Plain text message.
    #[serde(rename_all = "camelCase")]
    Chat {
        /// Chat the message belongs to.
        chat_id: ChatId,
        /// Message text.
        content: String,
    },

    /// Code snippet with a language tag.
    #[serde(rename_all = "camelCase")]
    Code {
        /// Chat the message belongs to.
        chat_id: ChatId,
        /// Code body.
        content: String,
        /// Syntax highlighting language.
        language: String,
    },

    /// Reference to an already-uploaded file.
    #[serde(rename_all = "camelCase")]
    File {
        /// Chat the message belongs to.
        chat_id: ChatId,
        /// File reference ID issued by the upload endpoint.
        content: String,
        /// Display name of the file.
        file_name: String,
    },
}

impl ClientFrame {
    /// Chat this frame targets.
    #[must_use]
    pub fn chat_id(&self) -> &ChatId {
        match self {
            Self::Chat { chat_id, .. }
            | Self::Code { chat_id, .. }
            | Self::File { chat_id, .. } => chat_id,
        }
    }

    /// Persisted message kind this frame maps to.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Chat { .. } => MessageKind::Text,
            Self::Code { .. } => MessageKind::Code,
            Self::File { .. } => MessageKind::File,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persisted messages
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a persisted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Code snippet.
    Code,
    /// File reference.
    File,
}

impl MessageKind {
    /// Stable string form, used as the database column value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::File => "file",
        }
    }
}

/// Language-tagged code body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeContent {
    /// Syntax highlighting language.
    pub language: String,
    /// Code body.
    pub content: String,
}

/// Kind-specific message content.
///
/// Exactly the fields for the message's kind are populated; the rest are
/// empty and omitted from the serialized form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    /// Text body (kind `text`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,

    /// Code body + language (kind `code`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeContent>,

    /// File reference ID (kind `file`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_id: String,

    /// File display name (kind `file`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
}

/// A message as persisted by the store and delivered to recipients.
///
/// The relay constructs this from a [`ClientFrame`] and hands it to the
/// message store; after a successful write the serialized form is fanned out
/// verbatim to every live session of every chat member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Message ID, minted by the relay at ingest time.
    pub id: MessageId,
    /// Chat the message belongs to.
    pub chat_id: ChatId,
    /// User that sent the message.
    pub sender_id: UserId,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Kind-specific content.
    pub content: MessageContent,
    /// Server-side creation time.
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Build a persisted message from an inbound frame.
    ///
    /// Kind-specific content is preserved verbatim: text goes to the text
    /// field, code keeps its language, a file keeps its reference and name.
    #[must_use]
    pub fn from_frame(sender_id: UserId, frame: ClientFrame) -> Self {
        let kind = frame.kind();
        let (chat_id, content) = match frame {
            ClientFrame::Chat { chat_id, content } => (
                chat_id,
                MessageContent {
                    text: content,
                    ..MessageContent::default()
                },
            ),
            ClientFrame::Code {
                chat_id,
                content,
                language,
            } => (
                chat_id,
                MessageContent {
                    code: Some(CodeContent { language, content }),
                    ..MessageContent::default()
                },
            ),
            ClientFrame::File {
                chat_id,
                content,
                file_name,
            } => (
                chat_id,
                MessageContent {
                    file_id: content,
                    file_name,
                    ..MessageContent::default()
                },
            ),
        };

        Self {
            id: MessageId::new(),
            chat_id,
            sender_id,
            kind,
            content,
            created_at: Utc::now(),
        }
    }
}
