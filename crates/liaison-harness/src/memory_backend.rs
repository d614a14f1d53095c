//! In-memory implementation of every backend contract.
//!
//! One `MemoryBackend` plays identity provider, push store, unread endpoint,
//! file-link service and directory. Feeds are real tokio channels, so the
//! session code under test runs exactly as in production. Fault hooks let
//! tests expire sessions, fail or stall individual recipients, and drop
//! feeds.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use liaison_chat::CryptoEngine;
use liaison_core::{
    AttachmentId, AttachmentRef, AttachmentStore, BackendError, BeneficiaryId, ChatBackend,
    Conversation, ConversationId, CounselorId, Directory, DistributionList, DistributionListId,
    Environment, Feed, FeedEvent, IdentityProvider, IssuedToken, LastMessage, MessageId,
    MessageRecord, NewMessage, SealedBody, SenderRole, Timestamp, UnreadCounts, count_unread,
};
use liaison_crypto::{KEY_SIZE, SymmetricKey};
use tokio::sync::{mpsc, watch};

use crate::sim_env::SimEnv;

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// How often each backend entry point was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `IdentityProvider::issue_token`
    pub issue_token: usize,
    /// `IdentityProvider::chat_key`
    pub chat_key: usize,
    /// `ChatBackend::sign_in`
    pub sign_in: usize,
    /// `ChatBackend::append_message`
    pub append_message: usize,
    /// `UnreadCounts::unread_counts`
    pub unread_counts: usize,
    /// `AttachmentStore::link`
    pub link: usize,
    /// `ChatBackend::watch_conversations`
    pub watch_conversations: usize,
    /// `ChatBackend::watch_messages`
    pub watch_messages: usize,
}

#[derive(Default)]
struct Faults {
    expire_appends: usize,
    failing_beneficiaries: BTreeSet<BeneficiaryId>,
    stalled_beneficiaries: BTreeSet<BeneficiaryId>,
    failing_links: BTreeSet<BeneficiaryId>,
    unread_unavailable: bool,
    watch_failures: usize,
    append_delay: Option<Duration>,
    sign_in_delay: Option<Duration>,
    reject_sign_ins: bool,
}

struct ConversationWatcher {
    counselor: CounselorId,
    beneficiaries: BTreeSet<BeneficiaryId>,
    tx: mpsc::UnboundedSender<FeedEvent<Vec<Conversation>>>,
}

struct MessageWatcher {
    conversation: ConversationId,
    tx: mpsc::UnboundedSender<FeedEvent<Vec<MessageRecord>>>,
}

struct Inner {
    key: SymmetricKey,
    token_ttl: Duration,
    issued: u64,
    live_tokens: BTreeSet<String>,
    session: Option<String>,
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: BTreeMap<ConversationId, Vec<MessageRecord>>,
    next_conversation: u64,
    next_message: u64,
    conversation_watchers: Vec<ConversationWatcher>,
    message_watchers: Vec<MessageWatcher>,
    portfolios: HashMap<CounselorId, watch::Sender<BTreeSet<BeneficiaryId>>>,
    lists: BTreeMap<DistributionListId, DistributionList>,
    links: BTreeMap<AttachmentId, BTreeSet<ConversationId>>,
    faults: Faults,
    calls: CallCounts,
    in_flight_appends: usize,
    max_in_flight_appends: usize,
}

impl Inner {
    fn check_session(&self) -> Result<(), BackendError> {
        match &self.session {
            Some(token) if self.live_tokens.contains(token) => Ok(()),
            _ => Err(BackendError::AuthExpired),
        }
    }

    fn find_or_create(
        &mut self,
        counselor: &CounselorId,
        beneficiary: &BeneficiaryId,
    ) -> ConversationId {
        if let Some(existing) = self
            .conversations
            .values()
            .find(|c| &c.counselor_id == counselor && &c.beneficiary_id == beneficiary)
        {
            return existing.id.clone();
        }

        self.next_conversation += 1;
        let id = ConversationId::new(format!("conv-{:04}", self.next_conversation));
        self.conversations
            .insert(id.clone(), Conversation::new(id.clone(), counselor.clone(), beneficiary.clone()));
        self.publish_conversations();
        id
    }

    fn append(
        &mut self,
        conversation: &ConversationId,
        sender_role: SenderRole,
        body: SealedBody,
        sent_at: Timestamp,
        attachment: Option<AttachmentRef>,
    ) -> Result<MessageId, BackendError> {
        let Some(summary) = self.conversations.get_mut(conversation) else {
            return Err(BackendError::NotFound(conversation.to_string()));
        };

        self.next_message += 1;
        let id = MessageId::new(format!("msg-{:06}", self.next_message));

        if summary.last_message.as_ref().is_none_or(|last| sent_at >= last.sent_at) {
            summary.last_message =
                Some(LastMessage { body: body.clone(), sent_at, sent_by: sender_role });
        }
        match sender_role {
            SenderRole::Counselor => summary.new_counselor_message_count += 1,
            SenderRole::Beneficiary => summary.seen_by_counselor = false,
        }

        self.messages.entry(conversation.clone()).or_default().push(MessageRecord {
            id: id.clone(),
            conversation_id: conversation.clone(),
            sender_role,
            body,
            sent_at,
            attachment,
        });

        self.publish_messages(conversation);
        self.publish_conversations();
        Ok(id)
    }

    fn conversation_snapshot(
        &self,
        counselor: &CounselorId,
        beneficiaries: &BTreeSet<BeneficiaryId>,
    ) -> Vec<Conversation> {
        self.conversations
            .values()
            .filter(|c| &c.counselor_id == counselor && beneficiaries.contains(&c.beneficiary_id))
            .cloned()
            .collect()
    }

    fn publish_conversations(&mut self) {
        let conversations = &self.conversations;
        self.conversation_watchers.retain(|watcher| {
            let snapshot: Vec<Conversation> = conversations
                .values()
                .filter(|c| {
                    c.counselor_id == watcher.counselor
                        && watcher.beneficiaries.contains(&c.beneficiary_id)
                })
                .cloned()
                .collect();
            watcher.tx.send(FeedEvent::Snapshot(snapshot)).is_ok()
        });
    }

    fn publish_messages(&mut self, conversation: &ConversationId) {
        let snapshot = self.messages.get(conversation).cloned().unwrap_or_default();
        self.message_watchers.retain(|watcher| {
            if &watcher.conversation != conversation {
                return !watcher.tx.is_closed();
            }
            watcher.tx.send(FeedEvent::Snapshot(snapshot.clone())).is_ok()
        });
    }
}

/// In-memory backend with fault injection.
///
/// Cloning shares state. All hooks are synchronous and take effect for the
/// next backend call.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    env: SimEnv,
    crypto: CryptoEngine<SimEnv>,
}

impl MemoryBackend {
    /// Create an empty backend. The chat key is drawn from `env`.
    pub fn new(env: SimEnv) -> Self {
        let mut key = [0u8; KEY_SIZE];
        env.random_bytes(&mut key);

        Self {
            inner: Arc::new(Mutex::new(Inner {
                key: SymmetricKey::new(key),
                token_ttl: DEFAULT_TOKEN_TTL,
                issued: 0,
                live_tokens: BTreeSet::new(),
                session: None,
                conversations: BTreeMap::new(),
                messages: BTreeMap::new(),
                next_conversation: 0,
                next_message: 0,
                conversation_watchers: Vec::new(),
                message_watchers: Vec::new(),
                portfolios: HashMap::new(),
                lists: BTreeMap::new(),
                links: BTreeMap::new(),
                faults: Faults::default(),
                calls: CallCounts::default(),
                in_flight_appends: 0,
                max_in_flight_appends: 0,
            })),
            crypto: CryptoEngine::new(env.clone()),
            env,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Setup

    /// Lifetime of issued tokens.
    pub fn set_token_ttl(&self, ttl: Duration) {
        self.lock().token_ttl = ttl;
    }

    /// Key served by [`IdentityProvider::chat_key`].
    pub fn symmetric_key(&self) -> SymmetricKey {
        self.lock().key.clone()
    }

    /// Serve `key` from now on. Sessions keep the key they fetched until
    /// their next credential refresh.
    pub fn rotate_key(&self, key: SymmetricKey) {
        self.lock().key = key;
        tracing::debug!("memory backend: chat key rotated");
    }

    /// Replace a counselor's portfolio. Open portfolio watches observe it.
    pub fn set_portfolio(
        &self,
        counselor: &CounselorId,
        beneficiaries: impl IntoIterator<Item = BeneficiaryId>,
    ) {
        let beneficiaries: BTreeSet<BeneficiaryId> = beneficiaries.into_iter().collect();
        let mut inner = self.lock();
        match inner.portfolios.get(counselor) {
            Some(sender) => {
                sender.send_replace(beneficiaries);
            },
            None => {
                inner.portfolios.insert(counselor.clone(), watch::Sender::new(beneficiaries));
            },
        }
    }

    /// Store a distribution list.
    pub fn put_distribution_list(&self, list: DistributionList) {
        self.lock().lists.insert(list.id.clone(), list);
    }

    /// Add a member to a stored list.
    pub fn add_list_member(&self, list: &DistributionListId, beneficiary: BeneficiaryId) {
        if let Some(list) = self.lock().lists.get_mut(list) {
            list.members.insert(beneficiary);
        }
    }

    /// Find or create a conversation without a session.
    pub fn open(&self, counselor: &CounselorId, beneficiary: &BeneficiaryId) -> ConversationId {
        self.lock().find_or_create(counselor, beneficiary)
    }

    /// A beneficiary writes an encrypted message.
    pub fn beneficiary_send(&self, conversation: &ConversationId, text: &str) -> MessageId {
        let key = self.symmetric_key();
        let body = self.crypto.encrypt(&key, conversation, text);
        self.push_record(conversation, SenderRole::Beneficiary, body, self.env.now())
    }

    /// Store a message as-is, bypassing encryption and session checks.
    ///
    /// # Panics
    ///
    /// Panics if the conversation does not exist.
    #[allow(clippy::expect_used)]
    pub fn push_record(
        &self,
        conversation: &ConversationId,
        sender_role: SenderRole,
        body: SealedBody,
        sent_at: Timestamp,
    ) -> MessageId {
        self.lock()
            .append(conversation, sender_role, body, sent_at, None)
            .expect("push_record into unknown conversation")
    }

    // Faults

    /// Revoke every issued token. The next authenticated call fails with
    /// [`BackendError::AuthExpired`].
    pub fn expire_session(&self) {
        let mut inner = self.lock();
        inner.live_tokens.clear();
        tracing::debug!("memory backend: all sessions revoked");
    }

    /// Fail the next `count` appends with [`BackendError::AuthExpired`].
    pub fn expire_next_appends(&self, count: usize) {
        self.lock().faults.expire_appends = count;
    }

    /// Reject every conversation open for `beneficiary`.
    pub fn fail_beneficiary(&self, beneficiary: BeneficiaryId) {
        self.lock().faults.failing_beneficiaries.insert(beneficiary);
    }

    /// Never answer conversation opens for `beneficiary`.
    pub fn stall_beneficiary(&self, beneficiary: BeneficiaryId) {
        self.lock().faults.stalled_beneficiaries.insert(beneficiary);
    }

    /// Fail attachment links into conversations with `beneficiary`.
    pub fn fail_links_for(&self, beneficiary: BeneficiaryId) {
        self.lock().faults.failing_links.insert(beneficiary);
    }

    /// Let every attachment link succeed again.
    pub fn heal_links(&self) {
        self.lock().faults.failing_links.clear();
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    /// Make the unread endpoint unavailable (or available again).
    pub fn set_unread_unavailable(&self, unavailable: bool) {
        self.lock().faults.unread_unavailable = unavailable;
    }

    /// Fail the next `count` feed opens. Conversation feeds report
    /// [`BackendError::Disconnected`], message feeds
    /// [`BackendError::Unavailable`].
    pub fn fail_next_watches(&self, count: usize) {
        self.lock().faults.watch_failures = count;
    }

    /// Hold every append for `delay` before persisting.
    pub fn set_append_delay(&self, delay: Option<Duration>) {
        self.lock().faults.append_delay = delay;
    }

    /// Hold every sign-in for `delay`.
    pub fn set_sign_in_delay(&self, delay: Option<Duration>) {
        self.lock().faults.sign_in_delay = delay;
    }

    /// Refuse every sign-in with [`BackendError::Rejected`] (or accept again).
    pub fn reject_sign_ins(&self, reject: bool) {
        self.lock().faults.reject_sign_ins = reject;
    }

    /// Disconnect every open feed.
    pub fn drop_feeds(&self) {
        let mut inner = self.lock();
        for watcher in inner.conversation_watchers.drain(..) {
            let _ = watcher.tx.send(FeedEvent::Disconnected);
        }
        for watcher in inner.message_watchers.drain(..) {
            let _ = watcher.tx.send(FeedEvent::Disconnected);
        }
    }

    /// Push the current message snapshot of `conversation` again.
    pub fn republish(&self, conversation: &ConversationId) {
        self.lock().publish_messages(conversation);
    }

    // Observation

    /// Call counters.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Highest number of appends observed in flight at once.
    pub fn max_in_flight_appends(&self) -> usize {
        self.lock().max_in_flight_appends
    }

    /// Stored messages of a conversation, in arrival order.
    pub fn messages(&self, conversation: &ConversationId) -> Vec<MessageRecord> {
        self.lock().messages.get(conversation).cloned().unwrap_or_default()
    }

    /// Stored conversation summary.
    pub fn conversation(&self, conversation: &ConversationId) -> Option<Conversation> {
        self.lock().conversations.get(conversation).cloned()
    }

    /// Conversation between a counselor and a beneficiary, if any.
    pub fn conversation_between(
        &self,
        counselor: &CounselorId,
        beneficiary: &BeneficiaryId,
    ) -> Option<ConversationId> {
        self.lock()
            .conversations
            .values()
            .find(|c| &c.counselor_id == counselor && &c.beneficiary_id == beneficiary)
            .map(|c| c.id.clone())
    }

    /// Number of counselor-authored messages to `beneficiary`.
    pub fn counselor_messages_to(&self, counselor: &CounselorId, beneficiary: &BeneficiaryId) -> usize {
        let Some(conversation) = self.conversation_between(counselor, beneficiary) else {
            return 0;
        };
        self.messages(&conversation)
            .iter()
            .filter(|m| m.sender_role == SenderRole::Counselor)
            .count()
    }

    /// Conversations an attachment was linked into.
    pub fn links_of(&self, attachment: &AttachmentId) -> BTreeSet<ConversationId> {
        self.lock().links.get(attachment).cloned().unwrap_or_default()
    }

    /// Unread count computed directly from stored messages.
    pub fn expected_unread(&self, conversation: &ConversationId) -> u32 {
        let inner = self.lock();
        let marker = inner.conversations.get(conversation).and_then(|c| c.last_counselor_read_at);
        let messages = inner.messages.get(conversation).map_or(&[][..], Vec::as_slice);
        count_unread(messages, marker)
    }

    /// Number of live (not yet dropped) feeds.
    pub fn open_feeds(&self) -> usize {
        let mut inner = self.lock();
        inner.conversation_watchers.retain(|w| !w.tx.is_closed());
        inner.message_watchers.retain(|w| !w.tx.is_closed());
        inner.conversation_watchers.len() + inner.message_watchers.len()
    }
}

/// Decrements the in-flight append counter even if the append is cancelled.
struct InFlight<'a>(&'a Mutex<Inner>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        inner.in_flight_appends -= 1;
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn issue_token(&self, counselor: &CounselorId) -> Result<IssuedToken, BackendError> {
        let mut inner = self.lock();
        inner.calls.issue_token += 1;
        inner.issued += 1;

        let token = format!("token-{counselor}-{}", inner.issued);
        let ttl = u64::try_from(inner.token_ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.env.now().plus_millis(ttl);
        inner.live_tokens.insert(token.clone());

        Ok(IssuedToken { token, expires_at })
    }

    async fn chat_key(&self, token: &str) -> Result<String, BackendError> {
        let mut inner = self.lock();
        inner.calls.chat_key += 1;
        if !inner.live_tokens.contains(token) {
            return Err(BackendError::AuthExpired);
        }
        Ok(inner.key.to_base64())
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn sign_in(&self, token: &str) -> Result<(), BackendError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.sign_in += 1;
            inner.faults.sign_in_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if inner.faults.reject_sign_ins {
            return Err(BackendError::Rejected("sign-in refused".to_string()));
        }
        if !inner.live_tokens.contains(token) {
            return Err(BackendError::AuthExpired);
        }
        inner.session = Some(token.to_string());
        Ok(())
    }

    async fn watch_conversations(
        &self,
        counselor: &CounselorId,
        beneficiaries: &BTreeSet<BeneficiaryId>,
    ) -> Result<Feed<Vec<Conversation>>, BackendError> {
        let mut inner = self.lock();
        inner.calls.watch_conversations += 1;
        if inner.faults.watch_failures > 0 {
            inner.faults.watch_failures -= 1;
            return Err(BackendError::Disconnected);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = inner.conversation_snapshot(counselor, beneficiaries);
        let _ = tx.send(FeedEvent::Snapshot(snapshot));
        inner.conversation_watchers.push(ConversationWatcher {
            counselor: counselor.clone(),
            beneficiaries: beneficiaries.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn watch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Feed<Vec<MessageRecord>>, BackendError> {
        let mut inner = self.lock();
        inner.calls.watch_messages += 1;
        if inner.faults.watch_failures > 0 {
            inner.faults.watch_failures -= 1;
            return Err(BackendError::Unavailable("message feed refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = inner.messages.get(conversation).cloned().unwrap_or_default();
        let _ = tx.send(FeedEvent::Snapshot(snapshot));
        inner.message_watchers.push(MessageWatcher { conversation: conversation.clone(), tx });
        Ok(rx)
    }

    async fn open_conversation(
        &self,
        counselor: &CounselorId,
        beneficiary: &BeneficiaryId,
    ) -> Result<ConversationId, BackendError> {
        {
            let mut inner = self.lock();
            inner.check_session()?;
            if inner.faults.failing_beneficiaries.contains(beneficiary) {
                return Err(BackendError::Rejected(format!("beneficiary {beneficiary} refused")));
            }
            if !inner.faults.stalled_beneficiaries.contains(beneficiary) {
                return Ok(inner.find_or_create(counselor, beneficiary));
            }
        }

        tracing::debug!(beneficiary = %beneficiary, "memory backend: stalling conversation open");
        std::future::pending::<Result<ConversationId, BackendError>>().await
    }

    async fn append_message(
        &self,
        conversation: &ConversationId,
        message: NewMessage,
    ) -> Result<MessageId, BackendError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.append_message += 1;
            inner.check_session()?;
            if inner.faults.expire_appends > 0 {
                inner.faults.expire_appends -= 1;
                return Err(BackendError::AuthExpired);
            }
            inner.in_flight_appends += 1;
            inner.max_in_flight_appends = inner.max_in_flight_appends.max(inner.in_flight_appends);
            inner.faults.append_delay
        };
        let _in_flight = InFlight(&self.inner);

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        inner.append(conversation, message.sender_role, message.body, message.sent_at, message.attachment)
    }

    async fn mark_counselor_read(
        &self,
        conversation: &ConversationId,
        at: Timestamp,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.check_session()?;

        let Some(summary) = inner.conversations.get_mut(conversation) else {
            return Err(BackendError::NotFound(conversation.to_string()));
        };
        if summary.last_counselor_read_at.is_some_and(|marker| at <= marker) {
            return Ok(());
        }
        summary.last_counselor_read_at = Some(at);
        summary.seen_by_counselor = true;

        inner.publish_conversations();
        Ok(())
    }

    async fn set_flagged(
        &self,
        conversation: &ConversationId,
        flagged: bool,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.check_session()?;

        let Some(summary) = inner.conversations.get_mut(conversation) else {
            return Err(BackendError::NotFound(conversation.to_string()));
        };
        summary.flagged_by_counselor = flagged;

        inner.publish_conversations();
        Ok(())
    }
}

#[async_trait]
impl UnreadCounts for MemoryBackend {
    async fn unread_counts(
        &self,
        token: &str,
        conversations: &[ConversationId],
    ) -> Result<HashMap<ConversationId, u32>, BackendError> {
        let mut inner = self.lock();
        inner.calls.unread_counts += 1;
        if inner.faults.unread_unavailable {
            return Err(BackendError::Unavailable("unread endpoint down".to_string()));
        }
        if !inner.live_tokens.contains(token) {
            return Err(BackendError::AuthExpired);
        }

        let counts = conversations
            .iter()
            .filter_map(|id| {
                let summary = inner.conversations.get(id)?;
                let messages = inner.messages.get(id).map_or(&[][..], Vec::as_slice);
                Some((id.clone(), count_unread(messages, summary.last_counselor_read_at)))
            })
            .collect();
        Ok(counts)
    }
}

#[async_trait]
impl AttachmentStore for MemoryBackend {
    async fn link(
        &self,
        attachment: &AttachmentRef,
        conversation: &ConversationId,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.link += 1;
        inner.check_session()?;

        let Some(summary) = inner.conversations.get(conversation) else {
            return Err(BackendError::NotFound(conversation.to_string()));
        };
        if inner.faults.failing_links.contains(&summary.beneficiary_id) {
            return Err(BackendError::Unavailable("file service unavailable".to_string()));
        }

        inner.links.entry(attachment.id.clone()).or_default().insert(conversation.clone());
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryBackend {
    async fn watch_portfolio(
        &self,
        counselor: &CounselorId,
    ) -> Result<watch::Receiver<BTreeSet<BeneficiaryId>>, BackendError> {
        let mut inner = self.lock();
        Ok(inner
            .portfolios
            .entry(counselor.clone())
            .or_insert_with(|| watch::Sender::new(BTreeSet::new()))
            .subscribe())
    }

    async fn distribution_list(
        &self,
        counselor: &CounselorId,
        list: &DistributionListId,
    ) -> Result<DistributionList, BackendError> {
        self.lock()
            .lists
            .get(list)
            .filter(|stored| &stored.counselor_id == counselor)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("distribution list {list}")))
    }
}
