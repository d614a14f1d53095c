//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from system resources (wall clock, randomness,
//! sleeping). Production uses the system clock and OS RNG; the simulation
//! harness uses a virtual clock and a seeded RNG.

use std::time::Duration;

use crate::ids::Timestamp;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    ///
    /// # Invariants
    ///
    /// - Subsequent calls return values >= previous calls.
    fn now(&self) -> Timestamp;

    /// Sleeps for the specified duration.
    ///
    /// Used by listener reconnect backoff only.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);
}
