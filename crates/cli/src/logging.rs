//! Logging setup for the `hive` binary.
//!
//! Logs go to stderr so command output on stdout stays clean. `HIVE_LOG`
//! takes an `EnvFilter` directive and wins over the default level.

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn build_env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env("HIVE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub fn init_logging(format: LogFormat, default_level: &str) -> Result<()> {
    let base_subscriber = Registry::default().with(build_env_filter(default_level));

    match format {
        LogFormat::Json => base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
