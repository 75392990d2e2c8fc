//! Subscriber setup for the `flim-stream` binary.
//!
//! `RUST_LOG` wins when set; otherwise the `[logging]` level applies. Thread
//! names are always printed so the `flim-reader`, `flim-processor` and
//! writer threads can be told apart.
//!
//! ```no_run
//! use flim_stream::{config::FlimConfig, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FlimConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! tracing::info!("acquisition started");
//! # Ok(())
//! # }
//! ```

use crate::config::FlimConfig;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Log line layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line with colors
    #[default]
    Pretty,
    /// One line per event, no colors
    Compact,
    /// One JSON object per event
    Json,
}

/// Filter built from the configured level, overridden by `RUST_LOG`.
fn env_filter(level: &str) -> Result<EnvFilter, String> {
    let level: LevelFilter = level
        .parse()
        .map_err(|_| format!("invalid log level '{level}'"))?;
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy())
}

/// Install the global subscriber described by `[logging]`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_from_config(config: &FlimConfig) -> Result<(), String> {
    let filter = env_filter(&config.logging.level)?;
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let layer = fmt::layer().with_thread_names(true);
    let result = match config.logging.format {
        OutputFormat::Pretty => tracing_subscriber::registry()
            .with(layer.pretty().with_filter(filter))
            .try_init(),
        OutputFormat::Compact => tracing_subscriber::registry()
            .with(layer.compact().with_ansi(false).with_filter(filter))
            .try_init(),
        OutputFormat::Json => tracing_subscriber::registry()
            .with(layer.json().with_filter(filter))
            .try_init(),
    };
    match result {
        // Lost a race with another initializer.
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        other => other.map_err(|e| format!("failed to initialize tracing: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_level() {
        assert!(env_filter("warn").is_ok());
        assert!(env_filter("DEBUG").is_ok());
        assert!(env_filter("verbose").is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut config = FlimConfig::default();
        config.logging.level = "error".to_string();
        config.logging.format = OutputFormat::Compact;
        assert!(init_from_config(&config).is_ok());
        assert!(init_from_config(&config).is_ok());
    }
}
