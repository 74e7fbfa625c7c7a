// src/observability.rs
//! Logging and metrics setup

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{CaptureError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber; `RUST_LOG` overrides the configured filter
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| CaptureError::Config(format!("invalid log filter: {}", e)))?;

    let json = config.json_logs.then(|| fmt::layer().json());
    let plain = (!config.json_logs).then(fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()
        .map_err(|e| CaptureError::Config(format!("tracing already initialised: {}", e)))
}

/// Serve Prometheus metrics on `addr`; no-op when unset
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: Option<&str>) -> Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };

    let listen: SocketAddr = addr
        .parse()
        .map_err(|e| CaptureError::Config(format!("invalid metrics address {}: {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| CaptureError::Config(format!("failed to install metrics exporter: {}", e)))?;

    info!("Serving metrics on http://{}/metrics", listen);
    Ok(())
}
