//! One message, many conversations.
//!
//! A broadcast is resolved once into a [`BroadcastJob`] (distribution lists
//! are read at that moment and later membership changes are ignored), then
//! delivered recipient by recipient.
//!
//! # Invariants
//!
//! - Every recipient of the job ends up in exactly one of
//!   [`BroadcastReport::succeeded`] or [`BroadcastReport::failed`].
//! - One recipient's failure or timeout never affects another recipient.
//! - At most `fan_out_width` recipients are in flight at any time.
//! - Delivery is not transactional: messages already persisted stay
//!   persisted when others fail.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use futures::stream::{self, StreamExt};
use liaison_core::{
    AttachmentRef, BackendError, BeneficiaryId, ChatBackend, ConversationId, Directory,
    DistributionListId, Environment, MessageId,
};

use crate::{
    attachment::AttachmentLinker,
    broker::CredentialBroker,
    channel::MessageChannel,
    error::{ChatError, RecipientFailure},
};

/// What the counselor selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastRequest {
    /// Individually selected beneficiaries
    pub beneficiaries: BTreeSet<BeneficiaryId>,
    /// Selected distribution lists
    pub lists: BTreeSet<DistributionListId>,
    /// Plaintext body
    pub body: String,
    /// Already-uploaded file to attach
    pub attachment: Option<AttachmentRef>,
}

/// A resolved, deduplicated broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastJob {
    /// Recipients as of resolution time
    pub recipients: BTreeSet<BeneficiaryId>,
    /// Plaintext body
    pub body: String,
    /// File to attach
    pub attachment: Option<AttachmentRef>,
}

/// A delivered message whose attachment still needs linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    /// Recipient
    pub recipient: BeneficiaryId,
    /// Conversation holding the message
    pub conversation_id: ConversationId,
    /// The delivered message
    pub message_id: MessageId,
}

/// Per-recipient outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients fully served
    pub succeeded: BTreeSet<BeneficiaryId>,
    /// Recipients with a failure, and what failed
    pub failed: BTreeMap<BeneficiaryId, RecipientFailure>,
}

impl BroadcastReport {
    /// Whether every recipient was fully served.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Job for the recipients whose message was never confirmed.
    ///
    /// Link failures are excluded: their message exists and resending would
    /// duplicate it. Returns `None` when nothing needs resending.
    pub fn send_retry(&self, job: &BroadcastJob) -> Option<BroadcastJob> {
        let recipients: BTreeSet<BeneficiaryId> = self
            .failed
            .iter()
            .filter(|(recipient, failure)| {
                !failure.message_delivered() && job.recipients.contains(*recipient)
            })
            .map(|(recipient, _)| recipient.clone())
            .collect();

        if recipients.is_empty() {
            return None;
        }

        Some(BroadcastJob {
            recipients,
            body: job.body.clone(),
            attachment: job.attachment.clone(),
        })
    }

    /// Delivered messages whose attachment link failed.
    pub fn link_retries(&self) -> Vec<PendingLink> {
        self.failed
            .iter()
            .filter_map(|(recipient, failure)| match failure {
                RecipientFailure::Link { conversation_id, message_id, .. } => Some(PendingLink {
                    recipient: recipient.clone(),
                    conversation_id: conversation_id.clone(),
                    message_id: message_id.clone(),
                }),
                RecipientFailure::Send(_) | RecipientFailure::Timeout(_) => None,
            })
            .collect()
    }
}

/// Fans a message out to many beneficiaries.
#[derive(Clone)]
pub struct BroadcastDispatcher<E: Environment> {
    broker: Arc<CredentialBroker<E>>,
    chat: Arc<dyn ChatBackend>,
    directory: Arc<dyn Directory>,
    channel: MessageChannel<E>,
    linker: AttachmentLinker<E>,
    fan_out_width: usize,
    send_timeout: Duration,
}

impl<E: Environment> BroadcastDispatcher<E> {
    /// Create a dispatcher sharing the session broker.
    pub fn new(
        broker: Arc<CredentialBroker<E>>,
        chat: Arc<dyn ChatBackend>,
        directory: Arc<dyn Directory>,
        channel: MessageChannel<E>,
        linker: AttachmentLinker<E>,
        fan_out_width: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            chat,
            directory,
            channel,
            linker,
            fan_out_width: fan_out_width.max(1),
            send_timeout,
        }
    }

    /// Validate a request and snapshot its recipients.
    ///
    /// # Errors
    ///
    /// - `InvalidBroadcast`: empty message or no recipients
    /// - `Backend`: a distribution list could not be read
    pub async fn resolve(&self, request: &BroadcastRequest) -> Result<BroadcastJob, ChatError> {
        if request.body.trim().is_empty() && request.attachment.is_none() {
            return Err(ChatError::InvalidBroadcast("message has neither text nor attachment"));
        }
        if request.beneficiaries.is_empty() && request.lists.is_empty() {
            return Err(ChatError::InvalidBroadcast("no recipient selected"));
        }

        let mut recipients = request.beneficiaries.clone();
        for list_id in &request.lists {
            let list = self
                .directory
                .distribution_list(self.broker.counselor(), list_id)
                .await
                .map_err(ChatError::Backend)?;
            tracing::debug!(list = %list_id, members = list.members.len(), "distribution list resolved");
            recipients.extend(list.members);
        }

        if recipients.is_empty() {
            return Err(ChatError::InvalidBroadcast("selected lists have no members"));
        }

        Ok(BroadcastJob {
            recipients,
            body: request.body.clone(),
            attachment: request.attachment.clone(),
        })
    }

    /// Resolve and deliver.
    ///
    /// # Errors
    ///
    /// Only before any send: `Closed` and the errors of
    /// [`BroadcastDispatcher::resolve`]. Per-recipient failures are in the
    /// report.
    pub async fn dispatch(&self, request: &BroadcastRequest) -> Result<BroadcastReport, ChatError> {
        if self.broker.is_closed() {
            return Err(ChatError::Closed);
        }

        let job = self.resolve(request).await?;
        Ok(self.deliver(&job).await)
    }

    /// Send the job to every recipient and wait for all of them.
    pub async fn deliver(&self, job: &BroadcastJob) -> BroadcastReport {
        let outcomes: Vec<(BeneficiaryId, Result<(), RecipientFailure>)> =
            stream::iter(job.recipients.iter().cloned())
                .map(|recipient| async move {
                    let outcome = self.deliver_one(&recipient, job).await;
                    (recipient, outcome)
                })
                .buffer_unordered(self.fan_out_width)
                .collect()
                .await;

        let mut report = BroadcastReport::default();
        for (recipient, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    report.succeeded.insert(recipient);
                },
                Err(failure) => {
                    tracing::warn!(recipient = %recipient, %failure, "broadcast recipient failed");
                    report.failed.insert(recipient, failure);
                },
            }
        }

        tracing::info!(
            recipients = job.recipients.len(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "broadcast delivered"
        );
        report
    }

    /// Retry attachment links only, for messages that were already delivered.
    pub async fn relink(&self, attachment: &AttachmentRef, pending: &[PendingLink]) -> BroadcastReport {
        let outcomes: Vec<(BeneficiaryId, Result<(), RecipientFailure>)> =
            stream::iter(pending.iter())
                .map(|target| async move {
                    let outcome = self
                        .link_within_deadline(attachment, &target.conversation_id)
                        .await
                        .map_err(|error| RecipientFailure::Link {
                            conversation_id: target.conversation_id.clone(),
                            message_id: target.message_id.clone(),
                            error,
                        });
                    (target.recipient.clone(), outcome)
                })
                .buffer_unordered(self.fan_out_width)
                .collect()
                .await;

        let mut report = BroadcastReport::default();
        for (recipient, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    report.succeeded.insert(recipient);
                },
                Err(failure) => {
                    report.failed.insert(recipient, failure);
                },
            }
        }
        report
    }

    async fn deliver_one(
        &self,
        recipient: &BeneficiaryId,
        job: &BroadcastJob,
    ) -> Result<(), RecipientFailure> {
        let sent = tokio::time::timeout(
            self.send_timeout,
            self.send_to(recipient, &job.body, job.attachment.clone()),
        )
        .await;

        let (conversation_id, message_id) = match sent {
            Ok(Ok(delivered)) => delivered,
            Ok(Err(error)) => return Err(RecipientFailure::Send(error)),
            Err(_elapsed) => return Err(RecipientFailure::Timeout(self.send_timeout)),
        };

        let Some(attachment) = &job.attachment else {
            return Ok(());
        };

        self.link_within_deadline(attachment, &conversation_id).await.map_err(|error| {
            RecipientFailure::Link { conversation_id, message_id, error }
        })
    }

    async fn send_to(
        &self,
        recipient: &BeneficiaryId,
        body: &str,
        attachment: Option<AttachmentRef>,
    ) -> Result<(ConversationId, MessageId), ChatError> {
        let chat = &self.chat;
        let counselor = self.broker.counselor();

        let conversation_id = self
            .broker
            .with_auth_retry(move |_| chat.open_conversation(counselor, recipient), ChatError::Send)
            .await?;
        let message_id = self.channel.send_message(&conversation_id, body, attachment).await?;

        Ok((conversation_id, message_id))
    }

    async fn link_within_deadline(
        &self,
        attachment: &AttachmentRef,
        conversation: &ConversationId,
    ) -> Result<(), ChatError> {
        match tokio::time::timeout(self.send_timeout, self.linker.link(attachment, conversation)).await
        {
            Ok(linked) => linked,
            Err(_elapsed) => Err(ChatError::Link(BackendError::Unavailable(format!(
                "link timed out after {:?}",
                self.send_timeout
            )))),
        }
    }
}
