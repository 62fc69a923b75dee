//! Frame dispatcher: routes inbound frames to registered handlers and
//! exposes the typed outbound send operations.
//!
//! Registration is keyed by the closed [`FrameType`] enum, so adding a
//! frame type is a compile-time-checked variant addition. Handlers run in
//! registration order and in isolation: one handler's failure is logged
//! and never blocks its siblings or future dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use chatat_proto::frame::{FrameType, InboundFrame, OutboundFrame};
use chatat_proto::id::{MessageId, UserId};
use chatat_proto::message::{ConversationKey, MessageKind};

use crate::connection::{ConnectionManager, SendError};

/// Failure reported by a frame handler.
///
/// Caught and logged by the dispatcher; never propagated to siblings.
#[derive(Debug, thiserror::Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Creates a handler error with the given description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Identifies one registered handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A registered frame handler.
pub type Handler = Arc<dyn Fn(&InboundFrame) -> Result<(), HandlerError> + Send + Sync>;

/// Routes inbound frames by type and builds canonical outbound frames.
pub struct Dispatcher {
    connection: Arc<ConnectionManager>,
    handlers: Mutex<HashMap<FrameType, Vec<(HandlerId, Handler)>>>,
    next_handler: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher that sends through the given connection.
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            handlers: Mutex::new(HashMap::new()),
            next_handler: AtomicU64::new(0),
        }
    }

    /// Adds a handler to the ordered list for `frame_type`.
    pub fn register(&self, frame_type: FrameType, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(frame_type)
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes a previously registered handler.
    pub fn unregister(&self, id: HandlerId) {
        let mut handlers = self.handlers.lock();
        for list in handlers.values_mut() {
            list.retain(|(hid, _)| *hid != id);
        }
    }

    /// Fans one inbound frame out to every handler registered for its
    /// type, in registration order. Handler failures are logged and do
    /// not stop sibling handlers.
    pub fn dispatch(&self, frame: &InboundFrame) {
        let frame_type = frame.frame_type();
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .get(&frame_type)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!(frame_type = %frame_type, "no handler registered, dropping frame");
            return;
        }
        for handler in handlers {
            if let Err(e) = handler(frame) {
                tracing::warn!(frame_type = %frame_type, err = %e, "frame handler failed");
            }
        }
    }

    /// Pump loop: dispatches every frame the connection delivers until
    /// the channel closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundFrame>) {
        while let Some(frame) = inbound.recv().await {
            self.dispatch(&frame);
        }
        tracing::debug!("inbound frame channel closed, dispatcher exiting");
    }

    /// Sends a chat message to the addressed conversation.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SendError`] based on connection status at call
    /// time; nothing is queued.
    pub fn send_message(
        &self,
        conversation: ConversationKey,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<(), SendError> {
        let (recipient_id, group_id) = conversation.routing();
        self.connection.send(OutboundFrame::Message {
            recipient_id,
            group_id,
            message: text.to_string(),
            message_type: MessageKind::Text,
            reply_to_id: reply_to,
            timestamp: Utc::now(),
        })
    }

    /// Signals the local user's typing state for the conversation.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SendError`] based on connection status.
    pub fn send_typing(
        &self,
        conversation: ConversationKey,
        is_typing: bool,
    ) -> Result<(), SendError> {
        let (recipient_id, group_id) = conversation.routing();
        self.connection.send(OutboundFrame::Typing {
            recipient_id,
            group_id,
            is_typing,
            timestamp: Utc::now(),
        })
    }

    /// Confirms the local user read the named message.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SendError`] based on connection status.
    pub fn send_read_receipt(
        &self,
        message_id: MessageId,
        sender_id: UserId,
    ) -> Result<(), SendError> {
        self.connection.send(OutboundFrame::ReadReceipt {
            message_id,
            sender_id,
            timestamp: Utc::now(),
        })
    }

    /// Sends a liveness probe. Fire-and-forget: the relay owes no reply.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SendError`] based on connection status.
    pub fn ping(&self) -> Result<(), SendError> {
        self.connection.send(OutboundFrame::Ping {
            timestamp: Utc::now(),
        })
    }
}
