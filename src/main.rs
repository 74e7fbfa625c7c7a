// src/main.rs
//! Traffic Capture Proxy
//!
//! Runs the recording forward proxy and streams every in-scope exchange to
//! the configured NDJSON sink until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use traffic_capture::interception::{CaptureController, CaptureProxy, InterceptorConfig};
use traffic_capture::ir::RecordSource;
use traffic_capture::observability::{init_metrics, init_tracing};
use traffic_capture::utils::config::{AppConfig, CaptureOptions};
use traffic_capture::BuildInfo;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let mut config = AppConfig::load().context("failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability)?;
    init_metrics(config.observability.metrics_addr.as_deref())?;

    let build = BuildInfo::current();
    info!(
        "Starting traffic capture v{} ({}, {})",
        build.version, build.git_hash, build.rustc_version
    );

    config.capture.source = RecordSource::Proxy;
    let options = CaptureOptions::from_config(config.capture.clone())
        .context("invalid capture configuration")?;
    let controller = CaptureController::new(options)?;

    let proxy = Arc::new(CaptureProxy::new(InterceptorConfig::from_proxy_config(
        &config.proxy,
    )?));
    controller.attach_async(proxy.as_ref());
    let listener = proxy.bind().await?;

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal, cleaning up...");
    };

    // Returns once in-flight exchanges have been recorded
    let served = Arc::clone(&proxy).serve(listener, shutdown_signal).await;

    controller.close()?;
    info!("Capture finished: {:?}", controller.stats());

    served.map_err(Into::into)
}
