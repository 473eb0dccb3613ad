//! Tracing subscriber setup.

use anyhow::Context;
use stash_core::config::GeneralConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    Plain,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parse `general.log_format`; anything but "json" is plain.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Plain
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `general.log_level`. An unparsable level
/// falls back to `info`.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_tracing(general: &GeneralConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match LogFormat::parse(&general.log_format) {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).flatten_event(true))
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().compact().with_target(true)).try_init(),
    }
    .context("Failed to initialize tracing subscriber")
}
