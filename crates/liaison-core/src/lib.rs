//! Liaison Core
//!
//! Domain types and external contracts shared by the messaging crates.
//!
//! # Architecture
//!
//! Nothing in this crate performs I/O. Backends (identity provider, push data
//! store, unread-count endpoint, file links, directory of portfolios and
//! distribution lists) are described as traits in [`backend`]; the session
//! components in `liaison-chat` depend only on these traits, and the
//! simulation harness implements them in memory.
//!
//! # Components
//!
//! - [`ids`]: Strongly-typed string identifiers and [`Timestamp`]
//! - [`model`]: Conversations, messages, sealed bodies, distribution lists
//! - [`backend`]: Async traits for every external collaborator
//! - [`env`]: [`Environment`] abstraction over time and randomness
//! - [`error`]: [`BackendError`] returned by every backend call

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backend;
pub mod env;
pub mod error;
pub mod ids;
pub mod model;

pub use backend::{
    AttachmentStore, ChatBackend, Directory, Feed, FeedEvent, IdentityProvider, UnreadCounts,
};
pub use env::Environment;
pub use error::BackendError;
pub use ids::{
    AttachmentId, BeneficiaryId, ConversationId, CounselorId, DistributionListId, MessageId,
    Timestamp,
};
pub use model::{
    AttachmentRef, Conversation, DistributionList, IssuedToken, LastMessage, MessageRecord,
    NewMessage, SealedBody, SenderRole, count_unread,
};
