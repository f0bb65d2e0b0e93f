//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the embedding application, which can use [`init`] for the usual setup.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "BOOSTPOOL_LOG";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a global fmt subscriber. Returns false if one was already installed.
pub fn init(format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .with_thread_names(true);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
