//! Wire frame types for the `ChatAt` persistent connection.
//!
//! Every frame on the socket is a flat JSON record with a discriminating
//! `type` field. Outbound and inbound sets are disjoint: the client sends
//! [`OutboundFrame`]s and the relay pushes [`InboundFrame`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::ContentDescriptor;
use crate::id::{GroupId, MessageId, UserId};
use crate::message::MessageKind;

/// Frames the client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A chat message addressed to a peer or a group.
    Message {
        /// Recipient, for direct messages.
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient_id: Option<UserId>,
        /// Group, for group messages.
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
        /// The message text.
        message: String,
        /// Content classification.
        message_type: MessageKind,
        /// Backward reference to the message being replied to.
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<MessageId>,
        /// Client send time.
        timestamp: DateTime<Utc>,
    },
    /// A typing state signal for the addressed conversation.
    Typing {
        /// Recipient, for direct conversations.
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient_id: Option<UserId>,
        /// Group, for group conversations.
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
        /// Whether the local user is currently typing.
        is_typing: bool,
        /// Client send time.
        timestamp: DateTime<Utc>,
    },
    /// Confirms the local user has read a message.
    ReadReceipt {
        /// The message that was read.
        message_id: MessageId,
        /// The author of that message.
        sender_id: UserId,
        /// Client send time.
        timestamp: DateTime<Utc>,
    },
    /// Liveness probe; the relay owes no response.
    Ping {
        /// Client send time.
        timestamp: DateTime<Utc>,
    },
}

/// A live chat message pushed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
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
    /// Attached content, in server order.
    #[serde(default)]
    pub content: Vec<ContentDescriptor>,
}

impl NewMessage {
    /// Addressing triple used for relevance checks.
    #[must_use]
    pub const fn origin(&self) -> FrameOrigin {
        FrameOrigin {
            sender: self.sender_id,
            recipient: self.recipient_id,
            group: self.group_id,
        }
    }
}

/// Frames the relay pushes to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A chat message for some conversation this user participates in.
    NewMessage(NewMessage),
    /// Acknowledgement that a locally sent message was stored and assigned an id.
    MessageSent {
        /// The server id assigned to the message.
        message_id: MessageId,
    },
    /// A remote participant's typing state changed.
    TypingIndicator {
        /// Who is typing (or stopped).
        user_id: UserId,
        /// Recipient, for direct conversations.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_id: Option<UserId>,
        /// Group, for group conversations.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
        /// `true` while typing, `false` on explicit stop.
        is_typing: bool,
    },
    /// A peer read one of the local user's messages.
    ReadReceipt {
        /// The message that was read.
        message_id: MessageId,
        /// The author of that message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<UserId>,
        /// Relay time of the receipt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Informational hello after the relay accepts the socket.
    ConnectionEstablished {
        /// The user the relay registered this socket for.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        /// Relay time of acceptance.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl InboundFrame {
    /// The discriminator of this frame, for dispatcher routing.
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        match self {
            Self::NewMessage(_) => FrameType::NewMessage,
            Self::MessageSent { .. } => FrameType::MessageSent,
            Self::TypingIndicator { .. } => FrameType::TypingIndicator,
            Self::ReadReceipt { .. } => FrameType::ReadReceipt,
            Self::ConnectionEstablished { .. } => FrameType::ConnectionEstablished,
        }
    }
}

/// Closed set of inbound frame discriminators.
///
/// Dispatcher handler registration is keyed by this enum, so adding a
/// frame type is a compile-time-checked variant addition rather than a
/// stringly-typed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// `new_message`
    NewMessage,
    /// `message_sent`
    MessageSent,
    /// `typing_indicator`
    TypingIndicator,
    /// `read_receipt`
    ReadReceipt,
    /// `connection_established`
    ConnectionEstablished,
}

impl FrameType {
    /// Parses a wire discriminator string, `None` for unknown types.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "new_message" => Some(Self::NewMessage),
            "message_sent" => Some(Self::MessageSent),
            "typing_indicator" => Some(Self::TypingIndicator),
            "read_receipt" => Some(Self::ReadReceipt),
            "connection_established" => Some(Self::ConnectionEstablished),
            _ => None,
        }
    }

    /// The wire discriminator string for this type.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::MessageSent => "message_sent",
            Self::TypingIndicator => "typing_indicator",
            Self::ReadReceipt => "read_receipt",
            Self::ConnectionEstablished => "connection_established",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// Addressing triple of an inbound frame, consumed by the relevance filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOrigin {
    /// Who produced the frame.
    pub sender: UserId,
    /// Direct-message recipient, if any.
    pub recipient: Option<UserId>,
    /// Group address, if any.
    pub group: Option<GroupId>,
}
