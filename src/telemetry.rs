//! Logging setup
//!
//! Installs a global `tracing` subscriber writing to stderr. `RUST_LOG`
//! overrides the configured filter when set.

use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}

/// Pick the filter expression: `RUST_LOG` if set, else the configured one
fn filter_expression(configured: &str, env: Option<String>) -> String {
    env.filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

fn build_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(expression).map_err(|e| TelemetryError::Filter(e.to_string()))
}

/// Install the global subscriber; later calls are no-ops
pub fn init(log_filter: &str) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let expression = filter_expression(log_filter, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter = build_filter(&expression)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    let _ = INSTALLED.set(());
    Ok(())
}
