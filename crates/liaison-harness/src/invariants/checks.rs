//! Standard invariant checks.

use std::{cmp::Reverse, collections::BTreeSet};

use liaison_chat::ConversationView;
use liaison_core::{ConversationId, Timestamp};

use super::{InboxSnapshot, Invariant, InvariantKind, InvariantResult, Violation};

/// Every delivered conversation list is in display order.
///
/// Unseen before seen, flagged before unflagged, newest activity first, then
/// conversation id.
pub struct ConversationOrdering;

impl Invariant for ConversationOrdering {
    fn kind(&self) -> InvariantKind {
        InvariantKind::ConversationOrdering
    }

    fn check(&self, state: &InboxSnapshot) -> InvariantResult {
        for (index, list) in state.conversation_lists.iter().enumerate() {
            for pair in list.windows(2) {
                if display_key(&pair[0]) > display_key(&pair[1]) {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!(
                            "delivery {index}: {} listed before {}",
                            pair[0].conversation.id, pair[1].conversation.id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

fn display_key(view: &ConversationView) -> (bool, bool, Reverse<Timestamp>, &ConversationId) {
    let conversation = &view.conversation;
    (
        conversation.seen_by_counselor,
        !conversation.flagged_by_counselor,
        Reverse(conversation.last_activity()),
        &conversation.id,
    )
}

/// Message deliveries never go back in time and never repeat a message.
pub struct MessageOrdering;

impl Invariant for MessageOrdering {
    fn kind(&self) -> InvariantKind {
        InvariantKind::MessageOrdering
    }

    fn check(&self, state: &InboxSnapshot) -> InvariantResult {
        for stream in &state.message_streams {
            for delivery in &stream.deliveries {
                for pair in delivery.windows(2) {
                    if pair[1].sent_at < pair[0].sent_at {
                        return Err(Violation {
                            invariant: self.kind(),
                            message: format!(
                                "conversation {:?}: {} at {} delivered after {} at {}",
                                stream.conversation,
                                pair[1].id,
                                pair[1].sent_at,
                                pair[0].id,
                                pair[0].sent_at
                            ),
                        });
                    }
                }

                let mut ids: Vec<_> = delivery.iter().map(|m| &m.id).collect();
                ids.sort();
                ids.dedup();
                if ids.len() != delivery.len() {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!(
                            "conversation {:?}: duplicate message in delivery",
                            stream.conversation
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Reported unread counts match the stored messages and read markers.
pub struct UnreadAccounting;

impl Invariant for UnreadAccounting {
    fn kind(&self) -> InvariantKind {
        InvariantKind::UnreadAccounting
    }

    fn check(&self, state: &InboxSnapshot) -> InvariantResult {
        for sample in &state.unread {
            if sample.reported != sample.expected {
                return Err(Violation {
                    invariant: self.kind(),
                    message: format!(
                        "conversation {}: reported {} unread, stored messages give {}",
                        sample.conversation, sample.reported, sample.expected
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Broadcast reports partition the recipients and match persisted messages.
///
/// - succeeded and failed are disjoint and cover the job exactly
/// - every succeeded recipient has a persisted message
/// - a link failure implies a persisted message
pub struct BroadcastPartition;

impl Invariant for BroadcastPartition {
    fn kind(&self) -> InvariantKind {
        InvariantKind::BroadcastPartition
    }

    fn check(&self, state: &InboxSnapshot) -> InvariantResult {
        for outcome in &state.broadcasts {
            let report = &outcome.report;

            if let Some(both) = report.succeeded.iter().find(|r| report.failed.contains_key(*r)) {
                return Err(self.violation(format!("{both} both succeeded and failed")));
            }

            let covered: BTreeSet<_> =
                report.succeeded.iter().chain(report.failed.keys()).cloned().collect();
            if covered != outcome.job.recipients {
                return Err(self.violation(format!(
                    "report covers {covered:?}, job targeted {:?}",
                    outcome.job.recipients
                )));
            }

            if let Some(missing) = report.succeeded.iter().find(|r| !outcome.persisted.contains(*r))
            {
                return Err(self.violation(format!("{missing} succeeded without a stored message")));
            }

            for (recipient, failure) in &report.failed {
                if failure.message_delivered() && !outcome.persisted.contains(recipient) {
                    return Err(self.violation(format!(
                        "{recipient} reported delivered-without-link but nothing is stored"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl BroadcastPartition {
    fn violation(&self, message: String) -> Violation {
        Violation { invariant: self.kind(), message }
    }
}
