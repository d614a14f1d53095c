//! Liaison Chat
//!
//! Session-scoped components of the counselor messaging core. A
//! [`ChatSession`] owns one [`CredentialBroker`] and wires the other
//! components to it.
//!
//! # Architecture
//!
//! ```text
//! CredentialBroker ──key──► CryptoEngine
//!        │                      │
//!        │            ┌─────────┴──────────┐
//!        ▼            ▼                    ▼
//!  ReadTracker  ConversationRegistry  MessageChannel ◄── BroadcastDispatcher
//!                                                           │
//!                                                  AttachmentLinker
//! ```
//!
//! Live views ([`ConversationRegistry::subscribe`],
//! [`MessageChannel::subscribe`]) run as tokio tasks and hand results to a
//! plain callback. Each returns a [`Subscription`]; disposing it (or closing
//! the session) stops the callbacks.
//!
//! # Failure handling
//!
//! - Expired backend sessions are refreshed once per operation
//!   ([`CredentialBroker::with_auth_retry`])
//! - Dropped feeds reconnect with exponential backoff
//! - Bodies that fail to decrypt surface as [`MessageBody::Undecipherable`]
//! - Broadcasts report per-recipient outcomes instead of failing as a whole

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod attachment;
mod backoff;
mod broadcast;
mod broker;
mod channel;
mod config;
mod crypto_engine;
mod error;
mod read_tracker;
mod registry;
mod session;
mod subscription;
mod system_env;

pub use attachment::AttachmentLinker;
pub use broadcast::{
    BroadcastDispatcher, BroadcastJob, BroadcastReport, BroadcastRequest, PendingLink,
};
pub use broker::{CredentialBroker, Credentials};
pub use channel::{ChannelMessage, MessageChannel};
pub use config::{BackoffConfig, ChatConfig};
pub use crypto_engine::{CryptoEngine, MessageBody};
pub use error::{ChatError, RecipientFailure};
pub use read_tracker::ReadTracker;
pub use registry::{ConversationRegistry, ConversationView, order_conversations};
pub use session::{Backends, ChatSession};
pub use subscription::Subscription;
pub use system_env::SystemEnv;
