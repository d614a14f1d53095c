//! Observable state snapshots for invariant checking.
//!
//! Tests record what subscribers and commands observed, plus the matching
//! backend ground truth, into an [`InboxSnapshot`]. Invariants run against
//! the snapshot rather than live state so a check is consistent.

use std::collections::BTreeSet;

use liaison_chat::{BroadcastJob, BroadcastReport, ChannelMessage, ConversationView};
use liaison_core::{BeneficiaryId, ConversationId};

/// Every delivery one message subscription received.
#[derive(Debug, Clone, Default)]
pub struct MessageStream {
    /// Conversation the subscription watched
    pub conversation: Option<ConversationId>,
    /// Deliveries in arrival order
    pub deliveries: Vec<Vec<ChannelMessage>>,
}

/// A reported unread count next to the count derived from stored messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadSample {
    /// Conversation
    pub conversation: ConversationId,
    /// Count returned by the session
    pub reported: u32,
    /// Count recomputed from stored messages
    pub expected: u32,
}

/// A finished broadcast with what the backend actually persisted.
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    /// Resolved job
    pub job: BroadcastJob,
    /// Report returned to the caller
    pub report: BroadcastReport,
    /// Recipients with a persisted counselor message
    pub persisted: BTreeSet<BeneficiaryId>,
}

/// Snapshot of one counselor's observed inbox.
#[derive(Debug, Clone, Default)]
pub struct InboxSnapshot {
    /// Conversation-list deliveries in arrival order
    pub conversation_lists: Vec<Vec<ConversationView>>,
    /// Message subscriptions
    pub message_streams: Vec<MessageStream>,
    /// Unread counts
    pub unread: Vec<UnreadSample>,
    /// Broadcasts
    pub broadcasts: Vec<BroadcastOutcome>,
}

impl InboxSnapshot {
    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }
}
