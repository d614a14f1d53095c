//! Conversation and message records as stored by the push backend.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{
    AttachmentId, BeneficiaryId, ConversationId, CounselorId, DistributionListId, MessageId,
    Timestamp,
};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// The counselor owning the conversation
    Counselor,
    /// The beneficiary on the other side
    Beneficiary,
}

/// Reference to a file owned by the external file service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// File service id
    pub id: AttachmentId,
    /// Display name
    pub name: String,
}

/// A message body as stored on the wire.
///
/// `ciphertext` and `iv` are base64. A body without `iv` is a legacy
/// plaintext record: `ciphertext` then holds the text verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBody {
    /// Base64 ciphertext, or the raw text for legacy records
    pub ciphertext: String,
    /// Base64 IV. `None` marks legacy plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

impl SealedBody {
    /// Encrypted body with its IV.
    pub fn encrypted(ciphertext: String, iv: String) -> Self {
        Self { ciphertext, iv: Some(iv) }
    }

    /// Legacy record stored before bodies were encrypted.
    pub fn legacy_plaintext(text: impl Into<String>) -> Self {
        Self { ciphertext: text.into(), iv: None }
    }

    /// Whether this body predates encryption.
    pub fn is_legacy(&self) -> bool {
        self.iv.is_none()
    }
}

/// Preview of the newest message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Sealed body of the newest message
    pub body: SealedBody,
    /// When it was sent
    pub sent_at: Timestamp,
    /// Who sent it
    pub sent_by: SenderRole,
}

/// Counselor/beneficiary conversation summary.
///
/// Server-authoritative: the backend updates `last_message`,
/// `seen_by_counselor` and `new_counselor_message_count` on every append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Document id
    pub id: ConversationId,
    /// Owning counselor
    pub counselor_id: CounselorId,
    /// Beneficiary on the other side
    pub beneficiary_id: BeneficiaryId,
    /// False while the beneficiary has written something the counselor has
    /// not read
    pub seen_by_counselor: bool,
    /// Counselor-set follow-up flag
    pub flagged_by_counselor: bool,
    /// Counselor messages the beneficiary has not read yet
    pub new_counselor_message_count: u32,
    /// Newest message. `None` for a conversation opened but never written to.
    pub last_message: Option<LastMessage>,
    /// Counselor read marker
    pub last_counselor_read_at: Option<Timestamp>,
    /// Beneficiary read marker
    pub last_beneficiary_read_at: Option<Timestamp>,
}

impl Conversation {
    /// Fresh, empty conversation.
    pub fn new(id: ConversationId, counselor_id: CounselorId, beneficiary_id: BeneficiaryId) -> Self {
        Self {
            id,
            counselor_id,
            beneficiary_id,
            seen_by_counselor: true,
            flagged_by_counselor: false,
            new_counselor_message_count: 0,
            last_message: None,
            last_counselor_read_at: None,
            last_beneficiary_read_at: None,
        }
    }

    /// `sent_at` of the newest message, [`Timestamp::EPOCH`] if none.
    pub fn last_activity(&self) -> Timestamp {
        self.last_message.as_ref().map_or(Timestamp::EPOCH, |m| m.sent_at)
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Document id, assigned by the backend
    pub id: MessageId,
    /// Parent conversation
    pub conversation_id: ConversationId,
    /// Author
    pub sender_role: SenderRole,
    /// Sealed body
    pub body: SealedBody,
    /// Send time
    pub sent_at: Timestamp,
    /// Attached file, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRef>,
}

/// A message about to be appended; the backend assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Author
    pub sender_role: SenderRole,
    /// Sealed body
    pub body: SealedBody,
    /// Send time
    pub sent_at: Timestamp,
    /// Attached file, if any
    pub attachment: Option<AttachmentRef>,
}

/// Named set of beneficiaries used as a broadcast target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionList {
    /// List id
    pub id: DistributionListId,
    /// Owning counselor
    pub counselor_id: CounselorId,
    /// Display title
    pub title: String,
    /// Members at the time the list was read
    pub members: BTreeSet<BeneficiaryId>,
}

/// Session token issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Opaque bearer token
    pub token: String,
    /// Expiry instant
    pub expires_at: Timestamp,
}

/// Counselor-side unread count of a conversation.
///
/// Counts beneficiary-authored messages sent strictly after
/// `last_counselor_read_at`; every beneficiary message counts when the
/// counselor never read the conversation.
pub fn count_unread(messages: &[MessageRecord], last_counselor_read_at: Option<Timestamp>) -> u32 {
    let unread = messages
        .iter()
        .filter(|m| m.sender_role == SenderRole::Beneficiary)
        .filter(|m| last_counselor_read_at.is_none_or(|read_at| m.sent_at > read_at))
        .count();
    u32::try_from(unread).unwrap_or(u32::MAX)
}
