//! Live, ordered conversation list of a counselor.
//!
//! A subscription watches two sources: the counselor's portfolio (which
//! beneficiaries are followed) and the conversation feed for that portfolio.
//! Every feed push is decrypted and fully reordered before delivery. A
//! portfolio change tears the feed down and opens a new one.

use std::{cmp::Reverse, collections::BTreeSet, sync::Arc};

use liaison_core::{
    BeneficiaryId, ChatBackend, Conversation, ConversationId, Directory, Environment, FeedEvent,
};
use liaison_crypto::SymmetricKey;
use tokio::sync::watch;

use crate::{
    backoff::Backoff,
    broker::{CredentialBroker, wait_closed},
    config::BackoffConfig,
    crypto_engine::{CryptoEngine, MessageBody},
    error::ChatError,
    subscription::{Listener, Subscription},
};

/// A conversation with its decrypted preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    /// Server-side conversation state
    pub conversation: Conversation,
    /// Newest message body, `None` when nothing was written yet
    pub preview: Option<MessageBody>,
}

/// Sort conversations for display.
///
/// Unseen before seen, then flagged before unflagged, then most recent
/// activity first (no message sorts oldest), then conversation id.
pub fn order_conversations(views: &mut [ConversationView]) {
    views.sort_by(|a, b| ordering_key(&a.conversation).cmp(&ordering_key(&b.conversation)));
}

fn ordering_key(
    conversation: &Conversation,
) -> (bool, bool, Reverse<liaison_core::Timestamp>, &ConversationId) {
    (
        conversation.seen_by_counselor,
        !conversation.flagged_by_counselor,
        Reverse(conversation.last_activity()),
        &conversation.id,
    )
}

enum FeedEnd {
    PortfolioChanged,
    Dropped,
}

/// Maintains the counselor's conversation list.
#[derive(Clone)]
pub struct ConversationRegistry<E: Environment> {
    broker: Arc<CredentialBroker<E>>,
    chat: Arc<dyn ChatBackend>,
    directory: Arc<dyn Directory>,
    crypto: CryptoEngine<E>,
    reconnect: BackoffConfig,
}

impl<E: Environment> ConversationRegistry<E> {
    /// Create a registry sharing the session broker.
    pub fn new(
        broker: Arc<CredentialBroker<E>>,
        chat: Arc<dyn ChatBackend>,
        directory: Arc<dyn Directory>,
        crypto: CryptoEngine<E>,
        reconnect: BackoffConfig,
    ) -> Self {
        Self { broker, chat, directory, crypto, reconnect }
    }

    /// Watch the counselor's conversations.
    ///
    /// `on_update` receives the complete, ordered list after every change.
    /// Deliveries stop when the returned [`Subscription`] is disposed or the
    /// session closes.
    ///
    /// # Errors
    ///
    /// - `Closed`: the session was closed
    /// - `Backend`: the portfolio could not be read
    pub async fn subscribe<F>(&self, on_update: F) -> Result<Subscription, ChatError>
    where
        F: Fn(Vec<ConversationView>) + Send + Sync + 'static,
    {
        if self.broker.is_closed() {
            return Err(ChatError::Closed);
        }

        let portfolio = self
            .directory
            .watch_portfolio(self.broker.counselor())
            .await
            .map_err(ChatError::Backend)?;

        let listener = Listener::new(on_update);
        let task = tokio::spawn(self.clone().listen(portfolio, Arc::clone(&listener)));
        Ok(Subscription::new(listener, task.abort_handle()))
    }

    /// Set or clear the follow-up flag of a conversation.
    ///
    /// # Errors
    ///
    /// - `Write`: the backend rejected the update
    /// - `AuthExpired`, `Auth`, `Closed`: credential failures
    pub async fn set_flagged(
        &self,
        conversation: &ConversationId,
        flagged: bool,
    ) -> Result<(), ChatError> {
        let chat = &self.chat;
        self.broker
            .with_auth_retry(move |_| chat.set_flagged(conversation, flagged), ChatError::Write)
            .await?;

        tracing::debug!(conversation = %conversation, flagged, "conversation flag updated");
        Ok(())
    }

    async fn listen(
        self,
        mut portfolio: watch::Receiver<BTreeSet<BeneficiaryId>>,
        listener: Arc<Listener<Vec<ConversationView>>>,
    ) {
        let counselor = self.broker.counselor().clone();
        let mut closed = self.broker.closed();
        let mut backoff = Backoff::new(self.reconnect.clone());
        let mut portfolio_open = true;

        loop {
            let beneficiaries = portfolio.borrow_and_update().clone();

            let mut feed = match self.chat.watch_conversations(&counselor, &beneficiaries).await {
                Ok(feed) => feed,
                Err(error) => {
                    tracing::warn!(
                        counselor = %counselor,
                        %error,
                        transient = error.is_transient(),
                        "conversation feed unavailable"
                    );
                    if !backoff.pause(self.broker.env(), &mut closed).await {
                        return;
                    }
                    continue;
                },
            };
            tracing::debug!(
                counselor = %counselor,
                beneficiaries = beneficiaries.len(),
                "conversation feed opened"
            );

            let end = loop {
                tokio::select! {
                    changed = portfolio.changed(), if portfolio_open => {
                        if changed.is_err() {
                            portfolio_open = false;
                            continue;
                        }
                        break FeedEnd::PortfolioChanged;
                    },
                    event = feed.recv() => match event {
                        Some(FeedEvent::Snapshot(conversations)) => {
                            let key = match self.broker.active().await {
                                Ok(credentials) => credentials,
                                Err(ChatError::Closed) => return,
                                Err(error) => {
                                    tracing::warn!(%error, "no credentials for conversation previews");
                                    break FeedEnd::Dropped;
                                },
                            };
                            backoff.reset();

                            let views = self.views(key.key(), conversations, &beneficiaries);
                            if !listener.deliver(views) {
                                return;
                            }
                        },
                        Some(FeedEvent::Disconnected) | None => break FeedEnd::Dropped,
                    },
                    () = wait_closed(&mut closed) => return,
                }
            };

            match end {
                FeedEnd::PortfolioChanged => {
                    tracing::info!(counselor = %counselor, "portfolio changed, rebuilding feed");
                },
                FeedEnd::Dropped => {
                    tracing::warn!(counselor = %counselor, "conversation feed dropped, reconnecting");
                    if !backoff.pause(self.broker.env(), &mut closed).await {
                        return;
                    }
                },
            }
        }
    }

    fn views(
        &self,
        key: &SymmetricKey,
        conversations: Vec<Conversation>,
        portfolio: &BTreeSet<BeneficiaryId>,
    ) -> Vec<ConversationView> {
        let mut views: Vec<ConversationView> = conversations
            .into_iter()
            .filter(|conversation| portfolio.contains(&conversation.beneficiary_id))
            .map(|conversation| {
                let preview = conversation
                    .last_message
                    .as_ref()
                    .map(|last| self.crypto.open(key, &conversation.id, &last.body));
                ConversationView { conversation, preview }
            })
            .collect();

        order_conversations(&mut views);
        views
    }
}

#[cfg(test)]
mod tests {
    use liaison_core::{CounselorId, LastMessage, SealedBody, SenderRole, Timestamp};

    use super::*;

    fn view(id: &str, seen: bool, flagged: bool, last: Option<u64>) -> ConversationView {
        let mut conversation = Conversation::new(
            ConversationId::new(id),
            CounselorId::new("counselor"),
            BeneficiaryId::new(format!("b-{id}")),
        );
        conversation.seen_by_counselor = seen;
        conversation.flagged_by_counselor = flagged;
        conversation.last_message = last.map(|at| LastMessage {
            body: SealedBody::legacy_plaintext("hi"),
            sent_at: Timestamp::from_millis(at),
            sent_by: SenderRole::Beneficiary,
        });
        ConversationView { conversation, preview: None }
    }

    fn ids(views: &[ConversationView]) -> Vec<&str> {
        views.iter().map(|v| v.conversation.id.as_str()).collect()
    }

    #[test]
    fn unseen_then_flagged_then_recent() {
        let mut views = vec![
            view("seen-old", true, false, Some(10)),
            view("seen-flagged", true, true, Some(5)),
            view("unseen-old", false, false, Some(1)),
            view("seen-new", true, false, Some(50)),
            view("unseen-flagged", false, true, Some(2)),
        ];

        order_conversations(&mut views);

        assert_eq!(
            ids(&views),
            vec!["unseen-flagged", "unseen-old", "seen-flagged", "seen-new", "seen-old"]
        );
    }

    #[test]
    fn missing_last_message_sorts_oldest() {
        let mut views = vec![view("empty", true, false, None), view("active", true, false, Some(3))];

        order_conversations(&mut views);

        assert_eq!(ids(&views), vec!["active", "empty"]);
    }

    #[test]
    fn ties_break_on_conversation_id() {
        let mut views = vec![view("b", true, false, Some(7)), view("a", true, false, Some(7))];

        order_conversations(&mut views);

        assert_eq!(ids(&views), vec!["a", "b"]);
    }
}
