//! Identifiers and timestamps.
//!
//! Backend documents are keyed by opaque strings. Each kind of id gets its own
//! newtype so a beneficiary id can never be passed where a conversation id is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an opaque backend id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Raw id string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// A counselor (conseiller), owner of a beneficiary portfolio.
    CounselorId
);
string_id!(
    /// A beneficiary (bénéficiaire) followed by a counselor.
    BeneficiaryId
);
string_id!(
    /// A counselor/beneficiary conversation document.
    ConversationId
);
string_id!(
    /// A message inside a conversation.
    MessageId
);
string_id!(
    /// A counselor-owned distribution list.
    DistributionListId
);
string_id!(
    /// A file already uploaded to the external file service.
    AttachmentId
);

/// Wall-clock instant in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch. Sorts before every real message.
    pub const EPOCH: Self = Self(0);

    /// Timestamp from milliseconds since the Unix epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the Unix epoch.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Timestamp `millis` later, saturating at `u64::MAX`.
    #[must_use]
    pub const fn plus_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ConversationId::new("conv-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"conv-42\"");

        let parsed: ConversationId = serde_json::from_str("\"conv-42\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn timestamps_order_by_millis() {
        assert!(Timestamp::from_millis(1) > Timestamp::EPOCH);
        assert_eq!(Timestamp::from_millis(10).plus_millis(5), Timestamp::from_millis(15));
        assert_eq!(Timestamp::from_millis(u64::MAX).plus_millis(1).as_millis(), u64::MAX);
    }
}
