//! Conversation reconciler: merges REST-fetched history, optimistic local
//! echoes, and live inbound frames into one ordered, deduplicated message
//! list for the single open conversation.
//!
//! Hydration and live frames can race — a message can arrive on the
//! socket before the history response returns. Frames that arrive before
//! `hydrate` are buffered and applied afterward in arrival order, never
//! dropped.

use chrono::{DateTime, Utc};

use chatat_proto::content::{ContentDescriptor, HistoryMessage};
use chatat_proto::frame::NewMessage;
use chatat_proto::id::{LocalId, MessageId, UserId};
use chatat_proto::message::ConversationKey;

/// Delivery lifecycle of a message. Transitions are monotonic; an entry
/// never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryState {
    /// Created locally, not yet acknowledged by the server.
    Pending,
    /// The server assigned an id.
    Sent,
    /// Delivery to the peer was acknowledged.
    Delivered,
    /// A read receipt referenced this message.
    Read,
}

impl DeliveryState {
    /// Advances to `next` if that is a forward transition; returns
    /// whether the state changed.
    pub fn advance(&mut self, next: Self) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// One entry in the visible message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Client temporary id; present only before server acknowledgement.
    pub local_id: Option<LocalId>,
    /// Server-assigned id; authoritative once present.
    pub server_id: Option<MessageId>,
    /// Author of the message.
    pub sender: UserId,
    /// Conversation this entry belongs to.
    pub conversation: ConversationKey,
    /// Message text; may be empty for content-only messages.
    pub text: String,
    /// Client-observed time while Pending, server time once confirmed.
    pub sent_at: DateTime<Utc>,
    /// Delivery lifecycle state.
    pub delivery: DeliveryState,
    /// Backward reference to the replied-to message.
    pub reply_to: Option<MessageId>,
    /// Attached content, in server order.
    pub content: Vec<ContentDescriptor>,
}

/// Produces the ordered, deduplicated view of the open conversation.
///
/// Exactly one instance is live at a time; opening another conversation
/// discards the previous reconciler, so no cross-conversation memory is
/// kept.
pub struct Reconciler {
    conversation: ConversationKey,
    local_user: UserId,
    match_window: chrono::Duration,
    hydrated: bool,
    buffered: Vec<NewMessage>,
    messages: Vec<Message>,
}

impl Reconciler {
    /// Creates a reconciler for the newly opened conversation.
    #[must_use]
    pub const fn new(
        conversation: ConversationKey,
        local_user: UserId,
        match_window: chrono::Duration,
    ) -> Self {
        Self {
            conversation,
            local_user,
            match_window,
            hydrated: false,
            buffered: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// The conversation this reconciler serves.
    #[must_use]
    pub const fn conversation(&self) -> ConversationKey {
        self.conversation
    }

    /// Whether history has been applied yet.
    #[must_use]
    pub const fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// The current visible message list, ordered by send time.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replaces the list with the fetched history, ordered by send time
    /// ascending (server id as tiebreaker), then applies frames buffered
    /// before hydration in their arrival order. Pending optimistic entries
    /// made before hydration are carried forward so their late echoes
    /// still deduplicate.
    pub fn hydrate(&mut self, history: Vec<HistoryMessage>) {
        let pending: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| m.delivery == DeliveryState::Pending)
            .collect();

        let mut list: Vec<Message> = history
            .into_iter()
            .map(|record| self.from_history(record))
            .collect();
        list.sort_by(|a, b| {
            a.sent_at
                .cmp(&b.sent_at)
                .then_with(|| a.server_id.cmp(&b.server_id))
        });
        list.extend(pending);
        self.messages = list;
        self.hydrated = true;

        let buffered = std::mem::take(&mut self.buffered);
        tracing::debug!(
            conversation = %self.conversation,
            buffered = buffered.len(),
            "hydrated, applying buffered frames"
        );
        for frame in &buffered {
            self.apply_inbound(frame);
        }
    }

    /// Inserts a Pending entry with a fresh temporary id at the end of
    /// the list and returns that id immediately, before any network round
    /// trip.
    pub fn append_optimistic(&mut self, text: &str, reply_to: Option<MessageId>) -> LocalId {
        let local_id = LocalId::new();
        self.messages.push(Message {
            local_id: Some(local_id),
            server_id: None,
            sender: self.local_user,
            conversation: self.conversation,
            text: text.to_string(),
            sent_at: Utc::now(),
            delivery: DeliveryState::Pending,
            reply_to,
            content: Vec::new(),
        });
        local_id
    }

    /// Removes a Pending optimistic entry by its temporary id, for a
    /// send that failed after the entry was created. No-op once the
    /// entry has been promoted or was never there.
    pub fn retract(&mut self, local_id: LocalId) -> bool {
        let before = self.messages.len();
        self.messages
            .retain(|m| m.local_id != Some(local_id) || m.delivery != DeliveryState::Pending);
        self.messages.len() != before
    }

    /// Feeds one relevant live message frame into the list.
    ///
    /// Before the first `hydrate` the frame is buffered; afterwards it is
    /// either matched to a Pending optimistic entry (dedup rule), dropped
    /// as a duplicate of a known server id, or inserted as a new entry at
    /// its timestamp position.
    pub fn on_inbound_message(&mut self, frame: &NewMessage) {
        if self.hydrated {
            self.apply_inbound(frame);
        } else {
            self.buffered.push(frame.clone());
        }
    }

    /// Advances the named message Sent -> Delivered on a send
    /// acknowledgement.
    pub fn on_send_ack(&mut self, message_id: MessageId) {
        match self.index_of(message_id) {
            Some(index) => {
                self.messages[index].delivery.advance(DeliveryState::Delivered);
            }
            None => {
                tracing::debug!(message_id = %message_id, "send ack for unknown message");
            }
        }
    }

    /// Advances the named message to Read iff it is currently Sent or
    /// Delivered. Idempotent; never regresses state.
    pub fn on_read_receipt(&mut self, message_id: MessageId) {
        let Some(index) = self.index_of(message_id) else {
            tracing::debug!(message_id = %message_id, "read receipt for unknown message");
            return;
        };
        let entry = &mut self.messages[index];
        if matches!(
            entry.delivery,
            DeliveryState::Sent | DeliveryState::Delivered
        ) {
            entry.delivery.advance(DeliveryState::Read);
        }
    }

    fn apply_inbound(&mut self, frame: &NewMessage) {
        // Dedup rule: a frame from the local user may be the server echo
        // of a Pending optimistic entry. The protocol does not round-trip
        // the temporary id, so the match is heuristic: same text within
        // the configured window.
        if frame.sender_id == self.local_user
            && let Some(index) = self.match_pending(frame)
        {
            let entry = &mut self.messages[index];
            entry.server_id = Some(frame.message_id);
            entry.local_id = None;
            entry.sent_at = frame.timestamp;
            entry.delivery.advance(DeliveryState::Sent);
            // Promoted in place: position is kept so the entry does not
            // visually jump.
            return;
        }

        if self.index_of(frame.message_id).is_some() {
            tracing::debug!(message_id = %frame.message_id, "duplicate message dropped");
            return;
        }

        let delivery = if frame.sender_id == self.local_user {
            DeliveryState::Sent
        } else {
            DeliveryState::Delivered
        };
        let message = Message {
            local_id: None,
            server_id: Some(frame.message_id),
            sender: frame.sender_id,
            conversation: self.conversation,
            text: frame.message.clone(),
            sent_at: frame.timestamp,
            delivery,
            reply_to: frame.reply_to_id,
            content: frame.content.clone(),
        };
        // Stable position: after every entry with an equal or earlier
        // timestamp, so equal-timestamp ordering follows insertion order.
        let at = self
            .messages
            .partition_point(|m| m.sent_at <= message.sent_at);
        self.messages.insert(at, message);
    }

    fn match_pending(&self, frame: &NewMessage) -> Option<usize> {
        self.messages.iter().position(|m| {
            m.delivery == DeliveryState::Pending
                && m.text == frame.message
                && (frame.timestamp - m.sent_at).abs() <= self.match_window
        })
    }

    fn index_of(&self, message_id: MessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.server_id == Some(message_id))
    }

    fn from_history(&self, record: HistoryMessage) -> Message {
        let delivery = if record.read {
            DeliveryState::Read
        } else if record.sender_id == self.local_user {
            DeliveryState::Sent
        } else {
            DeliveryState::Delivered
        };
        Message {
            local_id: None,
            server_id: Some(record.message_id),
            sender: record.sender_id,
            conversation: self.conversation,
            text: record.message,
            sent_at: record.timestamp,
            delivery,
            reply_to: record.reply_to_id,
            content: record.content,
        }
    }
}
