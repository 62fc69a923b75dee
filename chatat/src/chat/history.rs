//! History hydration surface.
//!
//! Fetching is a plain request/response call against the REST backend,
//! keyed by a user pair or a group id. The reconciler treats it as
//! fire-and-forget: a slow or failed fetch just leaves the list in its
//! pre-hydration (possibly buffered-only) state until the caller retries.

use chatat_proto::content::HistoryMessage;
use chatat_proto::id::UserId;
use chatat_proto::message::ConversationKey;

/// Error surfaced to the caller when a history fetch fails.
#[derive(Debug, thiserror::Error)]
pub enum HydrationError {
    /// The backend rejected or could not serve the request.
    #[error("history fetch failed: {0}")]
    Fetch(String),
    /// The response body was not a valid message list.
    #[error("history response malformed: {0}")]
    Malformed(String),
}

/// A source of conversation history records.
///
/// Implementations wrap the REST backend; tests use [`InMemoryHistory`].
pub trait HistorySource: Send + Sync {
    /// Fetches the ordered history for a conversation as seen by
    /// `local_user`.
    ///
    /// # Errors
    ///
    /// Returns [`HydrationError`] when the fetch fails; the caller may
    /// retry, and the reconciler keeps its pre-hydration state until then.
    fn fetch(
        &self,
        local_user: UserId,
        conversation: ConversationKey,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryMessage>, HydrationError>> + Send;
}

/// In-memory history source for tests and offline use.
#[derive(Default)]
pub struct InMemoryHistory {
    records: Vec<HistoryMessage>,
    fail: bool,
}

impl InMemoryHistory {
    /// Creates a source serving the given records.
    #[must_use]
    pub fn new(records: Vec<HistoryMessage>) -> Self {
        Self {
            records,
            fail: false,
        }
    }

    /// Creates a source whose every fetch fails.
    #[must_use]
    pub const fn failing() -> Self {
        Self {
            records: Vec::new(),
            fail: true,
        }
    }
}

impl HistorySource for InMemoryHistory {
    async fn fetch(
        &self,
        _local_user: UserId,
        _conversation: ConversationKey,
    ) -> Result<Vec<HistoryMessage>, HydrationError> {
        if self.fail {
            return Err(HydrationError::Fetch("in-memory source set to fail".into()));
        }
        Ok(self.records.clone())
    }
}
