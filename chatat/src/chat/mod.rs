//! Conversation sync layer: one open conversation at a time.
//!
//! [`ConversationSync`] wires the reconciler and presence aggregator into
//! the dispatcher when a conversation opens, runs the typing-expiry sweep,
//! and tears everything down when the conversation closes. Opening a new
//! conversation means dropping the old instance; no cross-conversation
//! state survives.

pub mod history;
pub mod reconcile;
pub mod relevance;
pub mod typing;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use chatat_proto::content::HistoryMessage;
use chatat_proto::frame::{FrameOrigin, FrameType, InboundFrame};
use chatat_proto::id::{LocalId, MessageId, UserId};
use chatat_proto::message::ConversationKey;

use crate::config::SyncConfig;
use crate::connection::SendError;
use crate::dispatch::{Dispatcher, HandlerId};

use history::{HistorySource, HydrationError};
use reconcile::{Message, Reconciler};
use typing::PresenceAggregator;

/// The sync surface for the currently open conversation.
pub struct ConversationSync {
    conversation: ConversationKey,
    local_user: UserId,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Mutex<Reconciler>>,
    presence: Arc<Mutex<PresenceAggregator>>,
    handler_ids: Vec<HandlerId>,
    sweep_task: tokio::task::JoinHandle<()>,
}

impl ConversationSync {
    /// Opens a conversation: builds its reconciler and presence
    /// aggregator, registers their frame handlers, and starts the
    /// typing-expiry sweep.
    #[must_use]
    pub fn open(
        dispatcher: Arc<Dispatcher>,
        conversation: ConversationKey,
        local_user: UserId,
        config: &SyncConfig,
    ) -> Self {
        let reconciler = Arc::new(Mutex::new(Reconciler::new(
            conversation,
            local_user,
            config.match_window,
        )));
        let presence = Arc::new(Mutex::new(PresenceAggregator::new(
            conversation,
            local_user,
            config.typing_ttl,
        )));

        let mut handler_ids = Vec::new();

        {
            let reconciler = Arc::clone(&reconciler);
            handler_ids.push(dispatcher.register(
                FrameType::NewMessage,
                Arc::new(move |frame| {
                    if let InboundFrame::NewMessage(msg) = frame
                        && relevance::is_relevant(&msg.origin(), conversation, local_user)
                    {
                        reconciler.lock().on_inbound_message(msg);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let reconciler = Arc::clone(&reconciler);
            handler_ids.push(dispatcher.register(
                FrameType::MessageSent,
                Arc::new(move |frame| {
                    if let InboundFrame::MessageSent { message_id } = frame {
                        reconciler.lock().on_send_ack(*message_id);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let reconciler = Arc::clone(&reconciler);
            handler_ids.push(dispatcher.register(
                FrameType::ReadReceipt,
                Arc::new(move |frame| {
                    if let InboundFrame::ReadReceipt { message_id, .. } = frame {
                        reconciler.lock().on_read_receipt(*message_id);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let presence = Arc::clone(&presence);
            handler_ids.push(dispatcher.register(
                FrameType::TypingIndicator,
                Arc::new(move |frame| {
                    if let InboundFrame::TypingIndicator {
                        user_id,
                        recipient_id,
                        group_id,
                        is_typing,
                    } = frame
                    {
                        let origin = FrameOrigin {
                            sender: *user_id,
                            recipient: *recipient_id,
                            group: *group_id,
                        };
                        presence.lock().on_typing_signal(*user_id, &origin, *is_typing);
                    }
                    Ok(())
                }),
            ));
        }

        let sweep_task = tokio::spawn({
            let presence = Arc::clone(&presence);
            let interval = config.sweep_interval;
            async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    presence.lock().sweep();
                }
            }
        });

        Self {
            conversation,
            local_user,
            dispatcher,
            reconciler,
            presence,
            handler_ids,
            sweep_task,
        }
    }

    /// The conversation this instance serves.
    #[must_use]
    pub const fn conversation(&self) -> ConversationKey {
        self.conversation
    }

    /// Fetches history from `source` and hydrates the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`HydrationError`] if the fetch fails; the reconciler
    /// keeps its pre-hydration state (buffered live frames included) so
    /// the caller can retry.
    pub async fn hydrate_from<S: HistorySource>(&self, source: &S) -> Result<(), HydrationError> {
        let records = source.fetch(self.local_user, self.conversation).await?;
        self.reconciler.lock().hydrate(records);
        Ok(())
    }

    /// Hydrates directly from already-fetched records.
    pub fn hydrate(&self, records: Vec<HistoryMessage>) {
        self.reconciler.lock().hydrate(records);
    }

    /// Inserts the optimistic Pending entry and sends the message.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SendError`] while not connected; the entry is
    /// retracted on failure, so the caller can disable submission
    /// instead of showing a message that will never leave.
    pub fn send_message(
        &self,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<LocalId, SendError> {
        // The entry must exist before the frame reaches the writer, so
        // the server echo always finds a Pending entry to promote no
        // matter how the tasks interleave.
        let local_id = self.reconciler.lock().append_optimistic(text, reply_to);
        if let Err(e) = self.dispatcher.send_message(self.conversation, text, reply_to) {
            self.reconciler.lock().retract(local_id);
            return Err(e);
        }
        Ok(local_id)
    }

    /// Signals the local user's typing state for this conversation.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SendError`] while not connected.
    pub fn send_typing(&self, is_typing: bool) -> Result<(), SendError> {
        self.dispatcher.send_typing(self.conversation, is_typing)
    }

    /// Sends a read receipt for the named message.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SendError`] while not connected.
    pub fn mark_read(&self, message_id: MessageId, sender_id: UserId) -> Result<(), SendError> {
        self.dispatcher.send_read_receipt(message_id, sender_id)
    }

    /// Snapshot of the ordered, deduplicated message list.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.reconciler.lock().messages().to_vec()
    }

    /// Whether history has been applied yet.
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.reconciler.lock().is_hydrated()
    }

    /// The set of remote users currently typing here.
    #[must_use]
    pub fn current_typers(&self) -> HashSet<UserId> {
        self.presence.lock().current_typers()
    }
}

impl Drop for ConversationSync {
    fn drop(&mut self) {
        for id in self.handler_ids.drain(..) {
            self.dispatcher.unregister(id);
        }
        self.sweep_task.abort();
    }
}
