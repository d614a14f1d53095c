//! Deterministic simulation harness for Liaison.
//!
//! In-memory implementations of every backend contract plus a seeded
//! [`SimEnv`], so session behavior (refresh, reconnect, fan-out, partial
//! failure) can be exercised reproducibly without a network.
//!
//! # Fault Injection
//!
//! [`MemoryBackend`] exposes targeted hooks (expire the session, fail or stall
//! one recipient, drop every feed). [`ChaoticBackend`] wraps it and fails
//! write paths at random from a seed.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks recorded observations against backend
//! ground truth. Use [`InvariantRegistry::standard()`] for every standard
//! check.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod chaotic;
pub mod invariants;
pub mod memory_backend;
pub mod recorder;
pub mod sim_env;
pub mod world;

pub use chaotic::ChaoticBackend;
pub use invariants::{
    BroadcastOutcome, BroadcastPartition, ConversationOrdering, InboxSnapshot, Invariant,
    InvariantKind, InvariantRegistry, InvariantResult, MessageOrdering, MessageStream,
    UnreadAccounting, UnreadSample, Violation,
};
pub use memory_backend::{CallCounts, MemoryBackend};
pub use recorder::Recorder;
pub use sim_env::{SIM_EPOCH_MS, SimEnv};
pub use world::SimWorld;
