//! Liaison simulation binary.
//!
//! Runs one counselor session against the in-memory backend: inbox, unread
//! counts, a broadcast with retries, and a read marker.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, no injected failures
//! liaison-sim
//!
//! # Scenario file plus overrides, 20% of writes failing
//! liaison-sim --config sim.toml --seed 42 --failure-rate 0.2
//! ```

mod config;
mod scenario;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::SimConfig;

/// Liaison session simulator
#[derive(Parser, Debug)]
#[command(name = "liaison-sim")]
#[command(about = "Simulated counselor messaging session")]
#[command(version)]
struct Args {
    /// Scenario file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for the environment and injected failures
    #[arg(short, long)]
    seed: Option<u64>,

    /// Size of the counselor's portfolio
    #[arg(short, long)]
    beneficiaries: Option<usize>,

    /// Probability that a write fails
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Maximum concurrent sends during the broadcast
    #[arg(long)]
    fan_out: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut SimConfig) {
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(beneficiaries) = self.beneficiaries {
            config.beneficiaries = beneficiaries;
            config.list_size = config.list_size.min(beneficiaries);
        }
        if let Some(rate) = self.failure_rate {
            config.failure_rate = rate;
        }
        if let Some(width) = self.fan_out {
            config.chat.fan_out_width = width;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = SimConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    tracing::info!(
        seed = config.seed,
        beneficiaries = config.beneficiaries,
        failure_rate = config.failure_rate,
        fan_out = config.chat.fan_out_width,
        "simulation starting"
    );

    let summary = scenario::run(&config).await?;

    for (beneficiary, failure) in &summary.failed {
        tracing::warn!(beneficiary = %beneficiary, %failure, "broadcast recipient not reached");
    }
    tracing::info!(
        conversations = summary.conversations,
        unread = summary.unread_total,
        delivered = summary.delivered,
        failed = summary.failed.len(),
        injected = summary.injected_failures,
        "simulation finished"
    );

    Ok(())
}
