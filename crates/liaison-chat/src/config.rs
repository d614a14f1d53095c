//! Session configuration.
//!
//! Every field has a default, so an empty TOML table (or no file at all)
//! yields a usable configuration.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for a [`crate::ChatSession`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum concurrent per-recipient sends during a broadcast
    pub fan_out_width: usize,
    /// Per-recipient deadline during a broadcast (milliseconds)
    pub send_timeout_ms: u64,
    /// Largest attachment accepted at the caller boundary (bytes)
    pub max_attachment_bytes: u64,
    /// Listener reconnect policy
    pub reconnect: BackoffConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            fan_out_width: 8,
            send_timeout_ms: 10_000,
            max_attachment_bytes: 5 * 1024 * 1024,
            reconnect: BackoffConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Per-recipient deadline as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Fan-out width, never below one.
    pub fn effective_fan_out(&self) -> usize {
        self.fan_out_width.max(1)
    }
}

/// Exponential backoff between listener reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay (milliseconds)
    pub initial_ms: u64,
    /// Upper bound on any delay (milliseconds)
    pub max_ms: u64,
    /// Growth factor between attempts
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_ms: 250, max_ms: 30_000, multiplier: 2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ChatConfig::default();
        assert_eq!(config.fan_out_width, 8);
        assert_eq!(config.send_timeout(), Duration::from_secs(10));
        assert!(config.reconnect.initial_ms <= config.reconnect.max_ms);
    }

    #[test]
    fn zero_fan_out_is_clamped() {
        let config = ChatConfig { fan_out_width: 0, ..ChatConfig::default() };
        assert_eq!(config.effective_fan_out(), 1);
    }
}
