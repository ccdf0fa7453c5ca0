//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{MonitorError, Result};

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
///
/// Fails with `Config` if the filter is invalid or a subscriber is already set.
pub fn init_tracing(config: &LoggingConfig, service_name: &str) -> Result<()> {
    let filter = build_filter(config)?;
    let json = config.json.then(|| fmt::layer().json());
    let plain = (!config.json).then(|| fmt::layer());

    let registry = tracing_subscriber::registry().with(filter).with(json).with(plain);

    #[cfg(feature = "otlp")]
    let registry = {
        let otel = match &config.otlp_endpoint {
            Some(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(endpoint, service_name)?)),
            None => None,
        };
        registry.with(otel)
    };

    registry
        .try_init()
        .map_err(|e| MonitorError::Config(format!("failed to install tracing subscriber: {}", e)))?;

    if cfg!(not(feature = "otlp")) && config.otlp_endpoint.is_some() {
        tracing::warn!("otlp_endpoint is set but sigma-monitor was built without the `otlp` feature");
    }
    tracing::debug!(service = service_name, json = config.json, "Tracing initialized");
    Ok(())
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| MonitorError::Config(format!("invalid log filter '{}': {}", config.level, e)))
}

#[cfg(feature = "otlp")]
fn otlp_tracer(endpoint: &str, service_name: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    let resource = opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
        "service.name",
        service_name.to_string(),
    )]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
        .with_trace_config(opentelemetry_sdk::trace::config().with_resource(resource))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| MonitorError::Config(format!("failed to install OTLP exporter: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "sigma_monitor=notalevel".to_string(),
            ..Default::default()
        };
        assert!(matches!(build_filter(&config), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_init_twice_reports_error() {
        let config = LoggingConfig::default();
        let first = init_tracing(&config, "test");
        let second = init_tracing(&config, "test");
        // Only one global subscriber can exist per process.
        assert!(first.is_err() || second.is_err());
    }
}
