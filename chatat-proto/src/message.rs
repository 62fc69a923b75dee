//! Conversation addressing and message classification types.

use serde::{Deserialize, Serialize};

use crate::id::{GroupId, UserId};

/// Identifies the conversation a message belongs to.
///
/// Two keys are equal iff their kind and the relevant id match. On the
/// wire a key is flattened into the `recipient_id` / `group_id` pair of
/// an outbound frame, exactly one of which is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationKey {
    /// One-to-one conversation with a single peer.
    Direct {
        /// The remote participant.
        peer: UserId,
    },
    /// Group conversation addressed by group id.
    Group {
        /// The group being addressed.
        group: GroupId,
    },
}

impl ConversationKey {
    /// Splits the key into the wire-level `(recipient_id, group_id)` pair.
    #[must_use]
    pub const fn routing(self) -> (Option<UserId>, Option<GroupId>) {
        match self {
            Self::Direct { peer } => (Some(peer), None),
            Self::Group { group } => (None, Some(group)),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct { peer } => write!(f, "direct:{peer}"),
            Self::Group { group } => write!(f, "group:{group}"),
        }
    }
}

/// Classifies outbound message content (`message_type` on the wire).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text message.
    #[default]
    Text,
    /// Message whose payload is an attachment reference.
    Content,
}
