//! Simulation settings: an optional TOML file, then CLI overrides.

use std::{
    fs,
    path::{Path, PathBuf},
};

use liaison_chat::ChatConfig;
use serde::Deserialize;
use thiserror::Error;

/// Why the simulation could not be configured.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was requested
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`SimConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but cannot describe a runnable scenario
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// One simulated counselor session.
///
/// ```toml
/// seed = 7
/// beneficiaries = 12
/// list_size = 6
/// failure_rate = 0.1
///
/// [chat]
/// fan_out_width = 4
/// send_timeout_ms = 2000
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Seed for the environment and for injected failures
    pub seed: u64,
    /// Size of the counselor's portfolio
    pub beneficiaries: usize,
    /// Members of the distribution list used for the broadcast
    pub list_size: usize,
    /// Probability that a conversation open, append or link fails
    pub failure_rate: f64,
    /// Broadcast body
    pub message: String,
    /// How many times failed sends are retried
    pub retry_rounds: usize,
    /// Session tunables
    pub chat: ChatConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            beneficiaries: 10,
            list_size: 5,
            failure_rate: 0.0,
            message: "Atelier CV jeudi 14h, salle 2.".to_string(),
            retry_rounds: 2,
            chat: ChatConfig::default(),
        }
    }
}

impl SimConfig {
    /// Read `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&text)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reject settings the scenario cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.beneficiaries == 0 {
            return Err(ConfigError::Invalid("beneficiaries must be at least 1"));
        }
        if self.list_size == 0 || self.list_size > self.beneficiaries {
            return Err(ConfigError::Invalid("list_size must be between 1 and beneficiaries"));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(ConfigError::Invalid("failure_rate must be between 0.0 and 1.0"));
        }
        if self.message.trim().is_empty() {
            return Err(ConfigError::Invalid("message must not be empty"));
        }
        Ok(())
    }
}
