//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` reads the wall clock, sleeps with tokio and draws IVs from the
//! OS RNG. Production behavior is therefore non-deterministic; tests use the
//! harness `SimEnv` instead.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use liaison_core::{Environment, Timestamp};

/// Production environment using system time and cryptographic RNG.
///
/// The wall clock is clamped so [`Environment::now`] never goes backwards even
/// if the system clock is adjusted.
///
/// # Panics
///
/// Panics if the OS RNG fails. A session without functioning cryptographic
/// randomness would reuse IVs, so continuing is not an option.
#[derive(Clone, Default)]
pub struct SystemEnv {
    last_now: Arc<AtomicU64>,
}

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Timestamp {
        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        let previous = self.last_now.fetch_max(wall, Ordering::SeqCst);
        Timestamp::from_millis(previous.max(wall))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - IVs would repeat");
    }
}
