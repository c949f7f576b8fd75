//! Logging setup
//!
//! `tracing-subscriber` with an `EnvFilter`. `RUST_LOG` takes precedence
//! over the configured level.

use crate::config::LoggingConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" | "plain" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Filter from `RUST_LOG`, falling back to `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed; the existing one
/// is kept.
///
/// # Errors
///
/// Returns an error for an unknown log format.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let format: LogFormat = config.format.parse().map_err(anyhow::Error::msg)?;
    let filter = env_filter(&config.level);

    let installed = match format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init().is_ok()
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(std::io::stderr)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init().is_ok()
        }
    };

    if installed {
        tracing::debug!(level = %config.level, format = %format, "logging initialized");
    }
    Ok(installed)
}
