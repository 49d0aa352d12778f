//! Logging for chatrelay
//!
//! Installs a `tracing-subscriber` pipeline writing human-readable or JSON
//! lines to stdout.

use chatrelay_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber
///
/// The filter is taken from `RUST_LOG` when set, then from `log_filter`
/// (the command line), then from the configuration.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global
/// subscriber is already installed
pub fn init(config: Option<&TelemetryConfig>, log_filter: Option<&str>) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let defaults = TelemetryConfig::default();
    let config = config.unwrap_or(&defaults);
    let filter = build_filter(config, log_filter)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry.with(fmt_layer).try_init(),
        LogFormat::Json => registry.with(fmt_layer.json().flatten_event(true)).try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::debug!(format = ?config.format, "logging initialized");

    Ok(())
}

fn build_filter(config: &TelemetryConfig, log_filter: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = log_filter.unwrap_or(&config.log_filter);

    EnvFilter::try_new(directive).map_err(|e| anyhow::anyhow!("invalid log filter '{directive}': {e}"))
}
