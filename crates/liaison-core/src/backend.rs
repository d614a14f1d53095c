//! Contracts for the external collaborators.
//!
//! The messaging core never talks to a network directly. Each collaborator is
//! a narrow async trait:
//!
//! - [`IdentityProvider`]: session tokens and the chat symmetric key
//! - [`ChatBackend`]: the push-capable document store (conversations and their
//!   messages) with live feeds
//! - [`UnreadCounts`]: bulk unread-count REST endpoint
//! - [`AttachmentStore`]: records references to already-uploaded files
//! - [`Directory`]: counselor portfolios and distribution lists
//!
//! Implementations must be `Send + Sync + 'static`; sessions share them behind
//! `Arc<dyn Trait>`.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{
    error::BackendError,
    ids::{BeneficiaryId, ConversationId, CounselorId, DistributionListId, MessageId, Timestamp},
    model::{AttachmentRef, Conversation, DistributionList, IssuedToken, MessageRecord, NewMessage},
};

/// Event pushed on a live feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent<T> {
    /// Current query result. Supersedes every earlier snapshot.
    Snapshot(T),
    /// The underlying listener dropped; the consumer must reopen the feed.
    Disconnected,
}

/// Live feed handle. A closed channel is equivalent to
/// [`FeedEvent::Disconnected`].
pub type Feed<T> = mpsc::UnboundedReceiver<FeedEvent<T>>;

/// Identity/session backend.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Issue a fresh session token for the counselor.
    async fn issue_token(&self, counselor: &CounselorId) -> Result<IssuedToken, BackendError>;

    /// Fetch the chat symmetric key (standard base64) for an authenticated
    /// session.
    async fn chat_key(&self, token: &str) -> Result<String, BackendError>;
}

/// Push-capable data backend holding conversations and messages.
///
/// Every write uses the session established by [`ChatBackend::sign_in`] and
/// fails with [`BackendError::AuthExpired`] once that session is stale.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Establish the live-backend session with a token.
    async fn sign_in(&self, token: &str) -> Result<(), BackendError>;

    /// Live feed of the counselor's conversations with the given
    /// beneficiaries. The current result is pushed immediately.
    async fn watch_conversations(
        &self,
        counselor: &CounselorId,
        beneficiaries: &BTreeSet<BeneficiaryId>,
    ) -> Result<Feed<Vec<Conversation>>, BackendError>;

    /// Live feed of one conversation's messages. Snapshots may arrive out of
    /// `sent_at` order.
    async fn watch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Feed<Vec<MessageRecord>>, BackendError>;

    /// Find the conversation between counselor and beneficiary, creating it
    /// when absent.
    async fn open_conversation(
        &self,
        counselor: &CounselorId,
        beneficiary: &BeneficiaryId,
    ) -> Result<ConversationId, BackendError>;

    /// Persist a message and return its assigned id.
    async fn append_message(
        &self,
        conversation: &ConversationId,
        message: NewMessage,
    ) -> Result<MessageId, BackendError>;

    /// Advance the counselor read marker.
    ///
    /// # Invariants
    ///
    /// - Monotonic: a write older than the stored marker is ignored, never
    ///   regresses it.
    async fn mark_counselor_read(
        &self,
        conversation: &ConversationId,
        at: Timestamp,
    ) -> Result<(), BackendError>;

    /// Set or clear the counselor follow-up flag.
    async fn set_flagged(
        &self,
        conversation: &ConversationId,
        flagged: bool,
    ) -> Result<(), BackendError>;
}

/// Bulk unread-count endpoint (`POST /unread-counts`).
#[async_trait]
pub trait UnreadCounts: Send + Sync + 'static {
    /// Counselor-side unread count per conversation. Ids unknown to the
    /// backend may be omitted from the answer.
    async fn unread_counts(
        &self,
        token: &str,
        conversations: &[ConversationId],
    ) -> Result<HashMap<ConversationId, u32>, BackendError>;
}

/// Reference bookkeeping for files held by the external file service.
#[async_trait]
pub trait AttachmentStore: Send + Sync + 'static {
    /// Record that `attachment` is referenced from `conversation`.
    async fn link(
        &self,
        attachment: &AttachmentRef,
        conversation: &ConversationId,
    ) -> Result<(), BackendError>;
}

/// Counselor portfolios and distribution lists.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Current beneficiary portfolio of a counselor; the receiver observes
    /// every later change.
    async fn watch_portfolio(
        &self,
        counselor: &CounselorId,
    ) -> Result<watch::Receiver<BTreeSet<BeneficiaryId>>, BackendError>;

    /// Read a distribution list as it is now.
    async fn distribution_list(
        &self,
        counselor: &CounselorId,
        list: &DistributionListId,
    ) -> Result<DistributionList, BackendError>;
}
