//! Unread counts and read markers.

use std::{collections::HashMap, sync::Arc};

use liaison_core::{ChatBackend, ConversationId, Environment, UnreadCounts};

use crate::{broker::CredentialBroker, error::ChatError};

/// Counselor-side read state.
#[derive(Clone)]
pub struct ReadTracker<E: Environment> {
    broker: Arc<CredentialBroker<E>>,
    chat: Arc<dyn ChatBackend>,
    unread: Arc<dyn UnreadCounts>,
}

impl<E: Environment> ReadTracker<E> {
    /// Create a tracker sharing the session broker.
    pub fn new(
        broker: Arc<CredentialBroker<E>>,
        chat: Arc<dyn ChatBackend>,
        unread: Arc<dyn UnreadCounts>,
    ) -> Self {
        Self { broker, chat, unread }
    }

    /// Unread counts for `conversations`, one bulk request.
    ///
    /// Never fails: ids the backend omits count as zero, and on any error
    /// every id counts as zero so the inbox still renders.
    pub async fn unread_counts_for(
        &self,
        conversations: &[ConversationId],
    ) -> HashMap<ConversationId, u32> {
        if conversations.is_empty() {
            return HashMap::new();
        }

        let unread = &self.unread;
        let answer = self
            .broker
            .with_auth_retry(
                move |credentials| async move {
                    unread.unread_counts(credentials.token(), conversations).await
                },
                ChatError::Backend,
            )
            .await;

        let known = match answer {
            Ok(counts) => counts,
            Err(error) => {
                tracing::warn!(
                    conversations = conversations.len(),
                    %error,
                    "unread counts unavailable, showing zero"
                );
                HashMap::new()
            },
        };

        conversations
            .iter()
            .map(|id| (id.clone(), known.get(id).copied().unwrap_or(0)))
            .collect()
    }

    /// Mark `conversation` read up to now.
    ///
    /// # Errors
    ///
    /// - `Write`: the backend rejected the marker
    /// - `AuthExpired`, `Auth`, `Closed`: credential failures
    pub async fn mark_read(&self, conversation: &ConversationId) -> Result<(), ChatError> {
        let at = self.broker.env().now();
        let chat = &self.chat;

        self.broker
            .with_auth_retry(move |_| chat.mark_counselor_read(conversation, at), ChatError::Write)
            .await?;

        tracing::debug!(conversation = %conversation, %at, "conversation marked read");
        Ok(())
    }
}
