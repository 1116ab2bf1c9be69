use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

/// Installs the Prometheus recorder with its own HTTP listener. Must run inside the tokio runtime.
pub fn init_metrics(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse().with_context(|| format!("metrics address {addr:?}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("install prometheus exporter")?;
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}
