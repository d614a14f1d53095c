//! Attachment references on outgoing messages.
//!
//! Files are uploaded to the external file service before sending; this
//! module only records which conversation references them.

use std::sync::Arc;

use liaison_core::{AttachmentRef, AttachmentStore, ConversationId, Environment};

use crate::{broker::CredentialBroker, error::ChatError};

/// Links uploaded files to conversations.
#[derive(Clone)]
pub struct AttachmentLinker<E: Environment> {
    broker: Arc<CredentialBroker<E>>,
    store: Arc<dyn AttachmentStore>,
    max_bytes: u64,
}

impl<E: Environment> AttachmentLinker<E> {
    /// Create a linker sharing the session broker.
    pub fn new(
        broker: Arc<CredentialBroker<E>>,
        store: Arc<dyn AttachmentStore>,
        max_bytes: u64,
    ) -> Self {
        Self { broker, store, max_bytes }
    }

    /// Record that `attachment` is referenced from `conversation`.
    ///
    /// # Errors
    ///
    /// - `Link`: the file service rejected the reference
    /// - `AuthExpired`, `Auth`, `Closed`: credential failures
    pub async fn link(
        &self,
        attachment: &AttachmentRef,
        conversation: &ConversationId,
    ) -> Result<(), ChatError> {
        let store = &self.store;
        self.broker
            .with_auth_retry(move |_| store.link(attachment, conversation), ChatError::Link)
            .await?;

        tracing::debug!(
            attachment = %attachment.id,
            conversation = %conversation,
            "attachment linked"
        );
        Ok(())
    }

    /// Reject files over the configured size before upload.
    ///
    /// # Errors
    ///
    /// - `AttachmentTooLarge`: `size` exceeds the limit
    pub fn check_size(&self, size: u64) -> Result<(), ChatError> {
        if size > self.max_bytes {
            return Err(ChatError::AttachmentTooLarge { size, limit: self.max_bytes });
        }
        Ok(())
    }
}
