//! Error types for session operations.
//!
//! Request-scoped failures are returned as [`ChatError`]. Per-recipient
//! broadcast outcomes use [`RecipientFailure`] so a caller can tell "message
//! never sent" apart from "message sent, attachment missing".

use std::time::Duration;

use liaison_core::{BackendError, ConversationId, MessageId};
use liaison_crypto::CryptoError;
use thiserror::Error;

/// Errors surfaced by session commands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Credentials could not be obtained or the backend refused sign-in
    #[error("authentication failed: {0}")]
    Auth(BackendError),

    /// Token expired again right after a refresh
    #[error("authentication expired after credential refresh")]
    AuthExpired,

    /// The chat key delivered by the identity backend is unusable
    #[error("invalid chat key: {0}")]
    Key(CryptoError),

    /// Message could not be sent
    #[error("send failed: {0}")]
    Send(BackendError),

    /// Read marker or flag could not be written
    #[error("write failed: {0}")]
    Write(BackendError),

    /// Attachment reference could not be recorded
    #[error("attachment link failed: {0}")]
    Link(BackendError),

    /// Any other backend call (feeds, directory lookups)
    #[error("backend error: {0}")]
    Backend(BackendError),

    /// Attachment exceeds the configured limit
    #[error("attachment too large: {size} bytes exceeds limit of {limit}")]
    AttachmentTooLarge {
        /// Attachment size in bytes
        size: u64,
        /// Configured limit in bytes
        limit: u64,
    },

    /// Broadcast request rejected before any send
    #[error("invalid broadcast: {0}")]
    InvalidBroadcast(&'static str),

    /// Session was closed
    #[error("session closed")]
    Closed,
}

/// Why one broadcast recipient did not get a complete delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecipientFailure {
    /// Conversation could not be opened or the message was not persisted
    #[error("send failed: {0}")]
    Send(ChatError),

    /// The message was not confirmed within the per-recipient deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The message was persisted but the attachment reference was not
    #[error("message {message_id} delivered but attachment not linked: {error}")]
    Link {
        /// Conversation the message landed in
        conversation_id: ConversationId,
        /// The delivered message
        message_id: MessageId,
        /// Link failure
        error: ChatError,
    },
}

impl RecipientFailure {
    /// True when the message itself reached the backend.
    pub fn message_delivered(&self) -> bool {
        matches!(self, Self::Link { .. })
    }
}
