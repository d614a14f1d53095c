//! Chaotic backend wrapper for fault injection testing
//!
//! Delegates to a [`MemoryBackend`] but randomly fails the write paths a
//! broadcast depends on (conversation open, message append, attachment link).
//! Identity, feeds and directory reads pass through untouched so a session
//! can always be opened.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use liaison_core::{
    AttachmentRef, AttachmentStore, BackendError, BeneficiaryId, ChatBackend, Conversation,
    ConversationId, CounselorId, Directory, DistributionList, DistributionListId, Feed,
    IdentityProvider, IssuedToken, MessageId, MessageRecord, NewMessage, Timestamp, UnreadCounts,
};
use tokio::sync::watch;

use crate::memory_backend::MemoryBackend;

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator: fast, and reproducible from a seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

/// Backend wrapper that randomly injects transient failures.
#[derive(Clone)]
pub struct ChaoticBackend {
    inner: MemoryBackend,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    injected: Arc<AtomicUsize>,
}

impl ChaoticBackend {
    /// Wrap `inner`, failing write operations with probability `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: MemoryBackend, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            injected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying backend (for checking invariants after chaos).
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Number of failures injected so far.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, operation: &'static str) -> Result<(), BackendError> {
        let roll = self.rng.lock().unwrap_or_else(PoisonError::into_inner).next();
        if roll < self.failure_rate {
            self.injected.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(operation, "chaotic failure injected");
            return Err(BackendError::Unavailable(format!("chaotic failure in {operation}")));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for ChaoticBackend {
    async fn issue_token(&self, counselor: &CounselorId) -> Result<IssuedToken, BackendError> {
        self.inner.issue_token(counselor).await
    }

    async fn chat_key(&self, token: &str) -> Result<String, BackendError> {
        self.inner.chat_key(token).await
    }
}

#[async_trait]
impl ChatBackend for ChaoticBackend {
    async fn sign_in(&self, token: &str) -> Result<(), BackendError> {
        self.inner.sign_in(token).await
    }

    async fn watch_conversations(
        &self,
        counselor: &CounselorId,
        beneficiaries: &BTreeSet<BeneficiaryId>,
    ) -> Result<Feed<Vec<Conversation>>, BackendError> {
        self.inner.watch_conversations(counselor, beneficiaries).await
    }

    async fn watch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Feed<Vec<MessageRecord>>, BackendError> {
        self.inner.watch_messages(conversation).await
    }

    async fn open_conversation(
        &self,
        counselor: &CounselorId,
        beneficiary: &BeneficiaryId,
    ) -> Result<ConversationId, BackendError> {
        self.maybe_fail("open_conversation")?;
        self.inner.open_conversation(counselor, beneficiary).await
    }

    async fn append_message(
        &self,
        conversation: &ConversationId,
        message: NewMessage,
    ) -> Result<MessageId, BackendError> {
        self.maybe_fail("append_message")?;
        self.inner.append_message(conversation, message).await
    }

    async fn mark_counselor_read(
        &self,
        conversation: &ConversationId,
        at: Timestamp,
    ) -> Result<(), BackendError> {
        self.inner.mark_counselor_read(conversation, at).await
    }

    async fn set_flagged(
        &self,
        conversation: &ConversationId,
        flagged: bool,
    ) -> Result<(), BackendError> {
        self.inner.set_flagged(conversation, flagged).await
    }
}

#[async_trait]
impl UnreadCounts for ChaoticBackend {
    async fn unread_counts(
        &self,
        token: &str,
        conversations: &[ConversationId],
    ) -> Result<HashMap<ConversationId, u32>, BackendError> {
        self.inner.unread_counts(token, conversations).await
    }
}

#[async_trait]
impl AttachmentStore for ChaoticBackend {
    async fn link(
        &self,
        attachment: &AttachmentRef,
        conversation: &ConversationId,
    ) -> Result<(), BackendError> {
        self.maybe_fail("link")?;
        self.inner.link(attachment, conversation).await
    }
}

#[async_trait]
impl Directory for ChaoticBackend {
    async fn watch_portfolio(
        &self,
        counselor: &CounselorId,
    ) -> Result<watch::Receiver<BTreeSet<BeneficiaryId>>, BackendError> {
        self.inner.watch_portfolio(counselor).await
    }

    async fn distribution_list(
        &self,
        counselor: &CounselorId,
        list: &DistributionListId,
    ) -> Result<DistributionList, BackendError> {
        self.inner.distribution_list(counselor, list).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_env::SimEnv;

    #[test]
    fn zero_rate_never_fails() {
        let chaotic = ChaoticBackend::with_seed(MemoryBackend::new(SimEnv::default()), 0.0, 7);

        for _ in 0..1000 {
            assert!(chaotic.maybe_fail("op").is_ok());
        }
        assert_eq!(chaotic.injected_failures(), 0);
    }

    #[test]
    fn full_rate_always_fails() {
        let chaotic = ChaoticBackend::with_seed(MemoryBackend::new(SimEnv::default()), 1.0, 7);

        for _ in 0..100 {
            assert!(matches!(chaotic.maybe_fail("op"), Err(BackendError::Unavailable(_))));
        }
        assert_eq!(chaotic.injected_failures(), 100);
    }

    #[test]
    fn same_seed_same_failures() {
        let a = ChaoticBackend::with_seed(MemoryBackend::new(SimEnv::default()), 0.3, 99);
        let b = ChaoticBackend::with_seed(MemoryBackend::new(SimEnv::default()), 0.3, 99);

        let left: Vec<bool> = (0..200).map(|_| a.maybe_fail("op").is_err()).collect();
        let right: Vec<bool> = (0..200).map(|_| b.maybe_fail("op").is_err()).collect();

        assert_eq!(left, right);
    }
}
