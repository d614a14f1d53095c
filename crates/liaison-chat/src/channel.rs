//! Per-conversation live message stream.
//!
//! # Invariants
//!
//! - Every delivery is the whole known history sorted by `(sent_at, id)`, so
//!   `sent_at` never decreases within one delivery.
//! - Messages are buffered by id across reconnects; a redelivered snapshot
//!   never duplicates an entry.
//! - A body that fails to decrypt becomes [`MessageBody::Undecipherable`] and
//!   the stream continues. It is opened again once the session holds newer
//!   credentials.

use std::{collections::BTreeMap, sync::Arc};

use liaison_core::{
    AttachmentRef, ChatBackend, ConversationId, Environment, FeedEvent, MessageId, MessageRecord,
    NewMessage, SenderRole, Timestamp,
};
use liaison_crypto::SymmetricKey;

use crate::{
    backoff::Backoff,
    broker::{CredentialBroker, wait_closed},
    config::BackoffConfig,
    crypto_engine::{CryptoEngine, MessageBody},
    error::ChatError,
    subscription::{Listener, Subscription},
};

/// A decrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Backend-assigned id
    pub id: MessageId,
    /// Author
    pub sender_role: SenderRole,
    /// Send time
    pub sent_at: Timestamp,
    /// Opened body
    pub body: MessageBody,
    /// Attached file, if any
    pub attachment: Option<AttachmentRef>,
}

/// Buffered message and the credential generation its body was opened with.
struct Buffered {
    message: ChannelMessage,
    key_generation: u64,
}

/// Sends and streams messages of individual conversations.
#[derive(Clone)]
pub struct MessageChannel<E: Environment> {
    broker: Arc<CredentialBroker<E>>,
    chat: Arc<dyn ChatBackend>,
    crypto: CryptoEngine<E>,
    reconnect: BackoffConfig,
}

impl<E: Environment> MessageChannel<E> {
    /// Create a channel sharing the session broker.
    pub fn new(
        broker: Arc<CredentialBroker<E>>,
        chat: Arc<dyn ChatBackend>,
        crypto: CryptoEngine<E>,
        reconnect: BackoffConfig,
    ) -> Self {
        Self { broker, chat, crypto, reconnect }
    }

    /// Stream the ordered, decrypted history of `conversation`.
    ///
    /// # Errors
    ///
    /// - `Closed`: the session was closed
    pub fn subscribe<F>(
        &self,
        conversation: ConversationId,
        on_messages: F,
    ) -> Result<Subscription, ChatError>
    where
        F: Fn(Vec<ChannelMessage>) + Send + Sync + 'static,
    {
        if self.broker.is_closed() {
            return Err(ChatError::Closed);
        }

        let listener = Listener::new(on_messages);
        let task = tokio::spawn(self.clone().listen(conversation, Arc::clone(&listener)));
        Ok(Subscription::new(listener, task.abort_handle()))
    }

    /// Encrypt and persist a counselor message.
    ///
    /// The body is encrypted per attempt, so a retry after a credential
    /// refresh uses the refreshed key.
    ///
    /// # Errors
    ///
    /// - `Send`: the backend did not persist the message
    /// - `AuthExpired`, `Auth`, `Key`, `Closed`: credential failures
    pub async fn send_message(
        &self,
        conversation: &ConversationId,
        plaintext: &str,
        attachment: Option<AttachmentRef>,
    ) -> Result<MessageId, ChatError> {
        let chat = &self.chat;
        let crypto = &self.crypto;
        let env = self.broker.env();

        let message_id = self
            .broker
            .with_auth_retry(
                move |credentials| {
                    let message = NewMessage {
                        sender_role: SenderRole::Counselor,
                        body: crypto.encrypt(credentials.key(), conversation, plaintext),
                        sent_at: env.now(),
                        attachment: attachment.clone(),
                    };
                    async move { chat.append_message(conversation, message).await }
                },
                ChatError::Send,
            )
            .await?;

        tracing::info!(conversation = %conversation, message = %message_id, "message sent");
        Ok(message_id)
    }

    async fn listen(
        self,
        conversation: ConversationId,
        listener: Arc<Listener<Vec<ChannelMessage>>>,
    ) {
        let mut closed = self.broker.closed();
        let mut backoff = Backoff::new(self.reconnect.clone());
        let mut buffer: BTreeMap<MessageId, Buffered> = BTreeMap::new();

        loop {
            let mut feed = match self.chat.watch_messages(&conversation).await {
                Ok(feed) => feed,
                Err(error) => {
                    tracing::warn!(
                        conversation = %conversation,
                        %error,
                        transient = error.is_transient(),
                        "message feed unavailable"
                    );
                    if !backoff.pause(self.broker.env(), &mut closed).await {
                        return;
                    }
                    continue;
                },
            };

            loop {
                tokio::select! {
                    event = feed.recv() => match event {
                        Some(FeedEvent::Snapshot(records)) => {
                            let credentials = match self.broker.active().await {
                                Ok(credentials) => credentials,
                                Err(ChatError::Closed) => return,
                                Err(error) => {
                                    tracing::warn!(%error, "no credentials for message stream");
                                    break;
                                },
                            };
                            backoff.reset();

                            merge(
                                &self.crypto,
                                &mut buffer,
                                credentials.key(),
                                credentials.generation(),
                                records,
                            );
                            if !listener.deliver(ordered(&buffer)) {
                                return;
                            }
                        },
                        Some(FeedEvent::Disconnected) | None => break,
                    },
                    () = wait_closed(&mut closed) => return,
                }
            }

            tracing::warn!(conversation = %conversation, "message feed dropped, reconnecting");
            if !backoff.pause(self.broker.env(), &mut closed).await {
                return;
            }
        }
    }
}

/// Add unseen records to the buffer.
///
/// Messages are immutable, so known ids are not decrypted again unless they
/// were undecipherable under an older key generation.
fn merge<E: Environment>(
    crypto: &CryptoEngine<E>,
    buffer: &mut BTreeMap<MessageId, Buffered>,
    key: &SymmetricKey,
    key_generation: u64,
    records: Vec<MessageRecord>,
) {
    for record in records {
        match buffer.get_mut(&record.id) {
            Some(known) => {
                if known.message.body == MessageBody::Undecipherable
                    && known.key_generation < key_generation
                {
                    known.message.body = crypto.open(key, &record.conversation_id, &record.body);
                    known.key_generation = key_generation;
                }
            },
            None => {
                let message = ChannelMessage {
                    body: crypto.open(key, &record.conversation_id, &record.body),
                    id: record.id.clone(),
                    sender_role: record.sender_role,
                    sent_at: record.sent_at,
                    attachment: record.attachment,
                };
                buffer.insert(record.id, Buffered { message, key_generation });
            },
        }
    }
}

fn ordered(buffer: &BTreeMap<MessageId, Buffered>) -> Vec<ChannelMessage> {
    let mut messages: Vec<ChannelMessage> =
        buffer.values().map(|buffered| buffered.message.clone()).collect();
    messages.sort_by(|a, b| (a.sent_at, &a.id).cmp(&(b.sent_at, &b.id)));
    messages
}
