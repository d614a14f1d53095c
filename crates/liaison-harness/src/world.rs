//! Ready-made simulation setup: one environment, one backend, one counselor.

use std::sync::Arc;

use liaison_chat::{Backends, BroadcastJob, BroadcastReport, ChatConfig, ChatError, ChatSession};
use liaison_core::{BeneficiaryId, ConversationId, CounselorId};

use crate::{
    invariants::{BroadcastOutcome, UnreadSample},
    memory_backend::MemoryBackend,
    sim_env::SimEnv,
};

/// A simulated deployment for one counselor.
#[derive(Clone)]
pub struct SimWorld {
    /// Shared environment
    pub env: SimEnv,
    /// Backend playing every external service
    pub backend: MemoryBackend,
    /// The signed-in counselor
    pub counselor: CounselorId,
}

impl SimWorld {
    /// Fresh world from `seed`.
    pub fn new(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        let backend = MemoryBackend::new(env.clone());
        Self { env, backend, counselor: CounselorId::new("counselor-1") }
    }

    /// Give the counselor `count` beneficiaries and return their ids.
    pub fn portfolio(&self, count: usize) -> Vec<BeneficiaryId> {
        let beneficiaries: Vec<BeneficiaryId> =
            (1..=count).map(|i| BeneficiaryId::new(format!("beneficiary-{i:03}"))).collect();
        self.backend.set_portfolio(&self.counselor, beneficiaries.iter().cloned());
        beneficiaries
    }

    /// Every collaborator backed by [`SimWorld::backend`].
    pub fn backends(&self) -> Backends {
        Backends::from_shared(Arc::new(self.backend.clone()))
    }

    /// Open a session for the counselor.
    pub async fn open_session(&self, config: ChatConfig) -> Result<ChatSession<SimEnv>, ChatError> {
        ChatSession::open(self.counselor.clone(), self.backends(), self.env.clone(), config).await
    }

    /// Pair a broadcast report with what the backend stored.
    pub fn broadcast_outcome(&self, job: &BroadcastJob, report: &BroadcastReport) -> BroadcastOutcome {
        let persisted = job
            .recipients
            .iter()
            .filter(|recipient| self.backend.counselor_messages_to(&self.counselor, recipient) > 0)
            .cloned()
            .collect();
        BroadcastOutcome { job: job.clone(), report: report.clone(), persisted }
    }

    /// Pair a reported unread count with the stored truth.
    pub fn unread_sample(&self, conversation: &ConversationId, reported: u32) -> UnreadSample {
        UnreadSample {
            conversation: conversation.clone(),
            reported,
            expected: self.backend.expected_unread(conversation),
        }
    }
}
