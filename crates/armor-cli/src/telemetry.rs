//! Logging setup for the binary.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set to `json` for machine-readable log lines
const LOG_FORMAT_VAR: &str = "PYC_ARMOR_LOG_FORMAT";

/// Install the global subscriber. Logs go to stderr so that stdout carries
/// only the report.
pub fn init_telemetry() -> Result<()> {
    let json = std::env::var(LOG_FORMAT_VAR).map_or(false, |format| format == "json");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init()?;

    Ok(())
}
