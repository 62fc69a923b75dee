//! Attachment content descriptors and history records.
//!
//! History hydration returns message records with the same logical fields
//! as a live `new_message` frame plus an ordered list of content
//! descriptors per message. Content with an unrecognized media type is
//! still listed as an opaque, downloadable reference — never rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{GroupId, MessageId, UserId};

/// Media type of an attachment, preserved verbatim from the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaType(String);

impl MediaType {
    /// Creates a media type from its wire string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw media type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a media type the client knows how to render inline.
    ///
    /// Anything else is treated as an opaque downloadable reference.
    #[must_use]
    pub fn is_renderable(&self) -> bool {
        matches!(self.0.as_str(), "texto" | "imagen" | "video" | "audio")
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One piece of non-text content attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    /// Media type as reported by the server.
    pub media_type: MediaType,
    /// Download location for the content.
    pub url: String,
    /// Optional caption shown alongside the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// One message record returned by history hydration.
///
/// Same logical fields as a live `new_message` frame, plus content
/// descriptors and the server-side read flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Server-assigned message id.
    pub message_id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Recipient, for direct messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    /// Group, for group messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    /// Message text; empty when the message carries only content.
    #[serde(default)]
    pub message: String,
    /// Server send time.
    pub timestamp: DateTime<Utc>,
    /// Backward reference to the message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    /// Whether the local user has already read this message.
    #[serde(default)]
    pub read: bool,
    /// Attached content, in server order.
    #[serde(default)]
    pub content: Vec<ContentDescriptor>,
}
