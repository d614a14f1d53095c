//! Counselor chat session.
//!
//! A session ties every component to one [`CredentialBroker`]. Opening it
//! acquires credentials and signs the live backend in; closing it destroys the
//! credentials and stops every listener started from it.

use std::sync::Arc;

use liaison_core::{
    AttachmentStore, ChatBackend, CounselorId, Directory, Environment, IdentityProvider,
    UnreadCounts,
};

use crate::{
    attachment::AttachmentLinker,
    broadcast::BroadcastDispatcher,
    broker::CredentialBroker,
    channel::MessageChannel,
    config::ChatConfig,
    crypto_engine::CryptoEngine,
    error::ChatError,
    read_tracker::ReadTracker,
    registry::ConversationRegistry,
};

/// The external collaborators of a session.
#[derive(Clone)]
pub struct Backends {
    /// Token and chat key issuance
    pub identity: Arc<dyn IdentityProvider>,
    /// Push backend for conversations and messages
    pub chat: Arc<dyn ChatBackend>,
    /// Bulk unread-count endpoint
    pub unread: Arc<dyn UnreadCounts>,
    /// Attachment reference bookkeeping
    pub attachments: Arc<dyn AttachmentStore>,
    /// Portfolios and distribution lists
    pub directory: Arc<dyn Directory>,
}

impl Backends {
    /// Use one object for every collaborator.
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: IdentityProvider + ChatBackend + UnreadCounts + AttachmentStore + Directory,
    {
        Self {
            identity: Arc::clone(&backend) as Arc<dyn IdentityProvider>,
            chat: Arc::clone(&backend) as Arc<dyn ChatBackend>,
            unread: Arc::clone(&backend) as Arc<dyn UnreadCounts>,
            attachments: Arc::clone(&backend) as Arc<dyn AttachmentStore>,
            directory: backend as Arc<dyn Directory>,
        }
    }
}

/// A signed-in counselor's messaging session.
///
/// Dropping the session closes it.
pub struct ChatSession<E: Environment> {
    broker: Arc<CredentialBroker<E>>,
    conversations: ConversationRegistry<E>,
    messages: MessageChannel<E>,
    reads: ReadTracker<E>,
    broadcasts: BroadcastDispatcher<E>,
    attachments: AttachmentLinker<E>,
    config: ChatConfig,
}

impl<E: Environment> ChatSession<E> {
    /// Acquire credentials, sign in and wire every component.
    ///
    /// # Errors
    ///
    /// - `Auth`: token, key or sign-in refused
    /// - `Key`: the chat key is unusable
    pub async fn open(
        counselor: CounselorId,
        backends: Backends,
        env: E,
        config: ChatConfig,
    ) -> Result<Self, ChatError> {
        let broker = Arc::new(CredentialBroker::new(
            counselor,
            Arc::clone(&backends.identity),
            Arc::clone(&backends.chat),
            env.clone(),
        ));

        let credentials = broker.get_credentials().await?;
        broker.ensure_signed_in(&credentials).await?;

        let crypto = CryptoEngine::new(env);
        let conversations = ConversationRegistry::new(
            Arc::clone(&broker),
            Arc::clone(&backends.chat),
            Arc::clone(&backends.directory),
            crypto.clone(),
            config.reconnect.clone(),
        );
        let messages = MessageChannel::new(
            Arc::clone(&broker),
            Arc::clone(&backends.chat),
            crypto,
            config.reconnect.clone(),
        );
        let reads = ReadTracker::new(
            Arc::clone(&broker),
            Arc::clone(&backends.chat),
            Arc::clone(&backends.unread),
        );
        let attachments = AttachmentLinker::new(
            Arc::clone(&broker),
            Arc::clone(&backends.attachments),
            config.max_attachment_bytes,
        );
        let broadcasts = BroadcastDispatcher::new(
            Arc::clone(&broker),
            Arc::clone(&backends.chat),
            Arc::clone(&backends.directory),
            messages.clone(),
            attachments.clone(),
            config.effective_fan_out(),
            config.send_timeout(),
        );

        tracing::info!(
            counselor = %broker.counselor(),
            generation = credentials.generation(),
            "chat session opened"
        );

        Ok(Self { broker, conversations, messages, reads, broadcasts, attachments, config })
    }

    /// Credential broker shared by every component.
    pub fn broker(&self) -> &Arc<CredentialBroker<E>> {
        &self.broker
    }

    /// Live conversation list.
    pub fn conversations(&self) -> &ConversationRegistry<E> {
        &self.conversations
    }

    /// Per-conversation streams and sending.
    pub fn messages(&self) -> &MessageChannel<E> {
        &self.messages
    }

    /// Unread counts and read markers.
    pub fn reads(&self) -> &ReadTracker<E> {
        &self.reads
    }

    /// Broadcast fan-out.
    pub fn broadcasts(&self) -> &BroadcastDispatcher<E> {
        &self.broadcasts
    }

    /// Attachment linking and size checks.
    pub fn attachments(&self) -> &AttachmentLinker<E> {
        &self.attachments
    }

    /// Session configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Destroy credentials and stop every listener. Idempotent.
    pub fn close(&self) {
        self.broker.close();
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        self.broker.is_closed()
    }
}

impl<E: Environment> Drop for ChatSession<E> {
    fn drop(&mut self) {
        self.close();
    }
}
