//! Relevance filter: does an inbound frame belong to the open conversation?
//!
//! Shared by message reconciliation and typing aggregation so relevance
//! semantics never diverge between the two.

use chatat_proto::frame::FrameOrigin;
use chatat_proto::id::UserId;
use chatat_proto::message::ConversationKey;

/// Returns `true` iff the frame addressed by `origin` belongs to the
/// conversation `open` as seen by `local_user`.
///
/// A group frame matches only the same group. A direct frame matches when
/// its sender/recipient pair equals `{local_user, peer}` in either
/// direction; a direct frame without a recipient is never relevant.
#[must_use]
pub fn is_relevant(origin: &FrameOrigin, open: ConversationKey, local_user: UserId) -> bool {
    match open {
        ConversationKey::Group { group } => origin.group == Some(group),
        ConversationKey::Direct { peer } => {
            if origin.group.is_some() {
                return false;
            }
            origin.recipient.is_some_and(|recipient| {
                (origin.sender == local_user && recipient == peer)
                    || (origin.sender == peer && recipient == local_user)
            })
        }
    }
}
