//! Tracing subscriber initialization.
//!
//! Structured console logging with an environment filter. Exporters and
//! scrape endpoints are outside this node's scope; the application's
//! metrics registry is reachable through [`ember_app::Metrics::registry`]
//! for whatever surface eventually wants it.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "ember-node".to_string(),
            default_filter: "info,ember=debug".to_string(),
        }
    }
}

/// Guard tying the subscriber's lifetime to the caller. Nothing to flush
/// today; the type keeps the init-once contract explicit.
pub struct TelemetryGuard {
    _private: (),
}

/// Initialize the global subscriber: `RUST_LOG`-style env filter plus a
/// fmt layer with targets and thread ids.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.clone()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!(service = %config.service_name, "telemetry initialized");
    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "ember-node");
        assert!(config.default_filter.contains("info"));
    }
}
