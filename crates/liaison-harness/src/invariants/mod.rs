//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold, whatever faults were
//! injected. They verify WHAT must be true, not specific scenarios.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.assert_all(&snapshot, "after broadcast");
//! ```

mod checks;
mod snapshot;

pub use checks::{BroadcastPartition, ConversationOrdering, MessageOrdering, UnreadAccounting};
pub use snapshot::{BroadcastOutcome, InboxSnapshot, MessageStream, UnreadSample};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Which invariant was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantKind {
    /// Conversation list display order
    ConversationOrdering,
    /// Per-conversation message order and uniqueness
    MessageOrdering,
    /// Unread counts against stored messages
    UnreadAccounting,
    /// Broadcast report shape against persisted messages
    BroadcastPartition,
}

impl std::fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ConversationOrdering => "conversation_ordering",
            Self::MessageOrdering => "message_ordering",
            Self::UnreadAccounting => "unread_accounting",
            Self::BroadcastPartition => "broadcast_partition",
        };
        f.write_str(name)
    }
}

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Violated invariant
    pub invariant: InvariantKind,
    /// What went wrong
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against an inbox snapshot.
pub trait Invariant: Send + Sync {
    /// Invariant identity for error reporting.
    fn kind(&self) -> InvariantKind;

    /// Check the invariant against observed state.
    fn check(&self, state: &InboxSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every standard invariant.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(ConversationOrdering);
        registry.add(MessageOrdering);
        registry.add(UnreadAccounting);
        registry.add(BroadcastPartition);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, state: &InboxSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation.
    ///
    /// # Panics
    ///
    /// Panics if any invariant is violated.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &InboxSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }
}
