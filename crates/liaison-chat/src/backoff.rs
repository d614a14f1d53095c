//! Reconnect delays for live listeners.

use std::time::Duration;

use liaison_core::Environment;
use tokio::sync::watch;

use crate::{broker::wait_closed, config::BackoffConfig};

/// Exponential backoff state.
///
/// # Invariants
///
/// - Delays never exceed `max_ms`
/// - [`Backoff::reset`] restores the initial delay
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let factor = u64::from(self.config.multiplier.max(1)).saturating_pow(self.attempt);
        let millis = self.config.initial_ms.saturating_mul(factor).min(self.config.max_ms);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(millis)
    }

    /// Forget past failures after a successful delivery.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Sleep out the next delay.
    ///
    /// Returns `false` when the session closes first.
    pub(crate) async fn pause<E: Environment>(
        &mut self,
        env: &E,
        closed: &mut watch::Receiver<bool>,
    ) -> bool {
        let delay = self.next_delay();
        tracing::debug!(?delay, attempt = self.attempt, "listener reconnect scheduled");

        tokio::select! {
            () = env.sleep(delay) => true,
            () = wait_closed(closed) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_then_cap() {
        let mut backoff =
            Backoff::new(BackoffConfig { initial_ms: 100, max_ms: 1000, multiplier: 2 });

        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn reset_restarts_from_initial() {
        let mut backoff =
            Backoff::new(BackoffConfig { initial_ms: 50, max_ms: 1000, multiplier: 3 });
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff =
            Backoff::new(BackoffConfig { initial_ms: 1, max_ms: 5000, multiplier: 10 });
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_millis(5000));
        }
    }
}
