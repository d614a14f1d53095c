//! One scripted counselor session against the simulated backend.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use liaison_chat::{
    Backends, BroadcastRequest, ChannelMessage, ChatError, ChatSession, ConversationView,
    MessageBody, RecipientFailure,
};
use liaison_core::{BeneficiaryId, DistributionList, DistributionListId};
use liaison_harness::{ChaoticBackend, Recorder, SimEnv, SimWorld};

use crate::config::SimConfig;

/// What the run observed.
#[derive(Debug, Default)]
pub struct Summary {
    /// Conversations shown in the inbox
    pub conversations: usize,
    /// Unread messages across the inbox before anything was marked read
    pub unread_total: u32,
    /// Broadcast recipients whose message was stored
    pub delivered: usize,
    /// Broadcast recipients still failing after every retry
    pub failed: BTreeMap<BeneficiaryId, RecipientFailure>,
    /// Failures injected by the chaotic backend
    pub injected_failures: usize,
}

/// Play the scenario described by `config`.
///
/// Beneficiaries write first, then the counselor opens a session, reads the
/// inbox, broadcasts to a list plus two individual picks, retries failed
/// sends and finally reads one conversation.
pub async fn run(config: &SimConfig) -> Result<Summary, ChatError> {
    let world = SimWorld::new(config.seed);
    let beneficiaries = world.portfolio(config.beneficiaries);
    seed_inbound_traffic(&world, &beneficiaries);

    let list_id = DistributionListId::new("list-collectif");
    world.backend.put_distribution_list(DistributionList {
        id: list_id.clone(),
        counselor_id: world.counselor.clone(),
        title: "Suivi collectif".to_string(),
        members: beneficiaries.iter().take(config.list_size).cloned().collect(),
    });

    let chaotic =
        Arc::new(ChaoticBackend::with_seed(world.backend.clone(), config.failure_rate, config.seed));
    let session = ChatSession::open(
        world.counselor.clone(),
        Backends::from_shared(Arc::clone(&chaotic)),
        world.env.clone(),
        config.chat.clone(),
    )
    .await?;

    let mut summary = Summary::default();

    let inbox: Recorder<Vec<ConversationView>> = Recorder::new();
    let _inbox_subscription = session.conversations().subscribe(inbox.callback()).await?;
    let views = inbox.wait_for(|views| !views.is_empty()).await.unwrap_or_default();
    summary.conversations = views.len();

    let ids: Vec<_> = views.iter().map(|view| view.conversation.id.clone()).collect();
    let unread = session.reads().unread_counts_for(&ids).await;
    for view in &views {
        let count = unread.get(&view.conversation.id).copied().unwrap_or(0);
        tracing::info!(
            conversation = %view.conversation.id,
            beneficiary = %view.conversation.beneficiary_id,
            seen = view.conversation.seen_by_counselor,
            unread = count,
            preview = view.preview.as_ref().and_then(MessageBody::text).unwrap_or("-"),
            "inbox entry"
        );
    }
    summary.unread_total = unread.values().sum();

    let request = BroadcastRequest {
        beneficiaries: beneficiaries.iter().skip(config.list_size).take(2).cloned().collect(),
        lists: BTreeSet::from([list_id]),
        body: config.message.clone(),
        attachment: None,
    };
    let mut job = session.broadcasts().resolve(&request).await?;
    tracing::info!(recipients = job.recipients.len(), "broadcast resolved");

    let mut delivered = BTreeSet::new();
    let mut report = session.broadcasts().deliver(&job).await;
    delivered.extend(report.succeeded.iter().cloned());
    for round in 1..=config.retry_rounds {
        let Some(retry) = report.send_retry(&job) else {
            break;
        };
        tracing::info!(round, pending = retry.recipients.len(), "retrying failed sends");
        report = session.broadcasts().deliver(&retry).await;
        delivered.extend(report.succeeded.iter().cloned());
        job = retry;
    }
    summary.delivered = delivered.len();
    summary.failed = report.failed;

    if let Some(first) = views.first() {
        read_conversation(&session, first).await?;
    }

    summary.injected_failures = chaotic.injected_failures();
    session.close();
    Ok(summary)
}

/// Every other beneficiary writes a few messages before the session opens.
fn seed_inbound_traffic(world: &SimWorld, beneficiaries: &[BeneficiaryId]) {
    for (index, beneficiary) in beneficiaries.iter().enumerate().step_by(2) {
        let conversation = world.backend.open(&world.counselor, beneficiary);
        for n in 0..=index % 3 {
            world.backend.beneficiary_send(&conversation, &format!("Bonjour, question {n}"));
        }
    }
}

async fn read_conversation(
    session: &ChatSession<SimEnv>,
    view: &ConversationView,
) -> Result<(), ChatError> {
    let conversation = view.conversation.id.clone();
    let stream: Recorder<Vec<ChannelMessage>> = Recorder::new();
    let subscription = session.messages().subscribe(conversation.clone(), stream.callback())?;

    let messages = stream.wait_for(|messages| !messages.is_empty()).await.unwrap_or_default();
    let undecipherable =
        messages.iter().filter(|m| matches!(m.body, MessageBody::Undecipherable)).count();
    tracing::info!(
        conversation = %conversation,
        messages = messages.len(),
        undecipherable,
        "conversation opened"
    );

    session.reads().mark_read(&conversation).await?;
    let remaining = session.reads().unread_counts_for(std::slice::from_ref(&conversation)).await;
    tracing::info!(
        conversation = %conversation,
        unread = remaining.get(&conversation).copied().unwrap_or(0),
        "conversation marked read"
    );

    subscription.dispose();
    Ok(())
}
