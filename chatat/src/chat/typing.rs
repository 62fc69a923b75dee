//! Presence aggregator: tracks who is typing in the open conversation.
//!
//! Positive signals insert or refresh an entry with a TTL; explicit stop
//! signals remove it immediately. A periodic sweep (driven by the owner)
//! removes expired entries, so a typer vanishes within the TTL plus one
//! sweep interval of their last positive signal.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use chatat_proto::frame::FrameOrigin;
use chatat_proto::id::UserId;
use chatat_proto::message::ConversationKey;

use super::relevance;

/// Per-conversation typing state with per-user expiry.
pub struct PresenceAggregator {
    conversation: ConversationKey,
    local_user: UserId,
    ttl: Duration,
    typers: HashMap<UserId, Instant>,
}

impl PresenceAggregator {
    /// Creates an aggregator for the open conversation.
    #[must_use]
    pub fn new(conversation: ConversationKey, local_user: UserId, ttl: Duration) -> Self {
        Self {
            conversation,
            local_user,
            ttl,
            typers: HashMap::new(),
        }
    }

    /// Applies one typing signal.
    ///
    /// Ignored unless the signal is relevant to the open conversation and
    /// comes from a remote user. `is_typing` refreshes the entry's expiry;
    /// a stop signal removes it immediately regardless of expiry.
    pub fn on_typing_signal(&mut self, user: UserId, origin: &FrameOrigin, is_typing: bool) {
        if user == self.local_user
            || !relevance::is_relevant(origin, self.conversation, self.local_user)
        {
            return;
        }
        if is_typing {
            self.typers.insert(user, Instant::now() + self.ttl);
        } else {
            self.typers.remove(&user);
        }
    }

    /// Removes entries whose expiry has passed. Called by the owner's
    /// background tick.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        self.typers.retain(|_, expires_at| *expires_at > now);
    }

    /// The set of users currently typing. The only query surface;
    /// rendering formats it elsewhere.
    #[must_use]
    pub fn current_typers(&self) -> HashSet<UserId> {
        let now = Instant::now();
        self.typers
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(user, _)| *user)
            .collect()
    }
}
