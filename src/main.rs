//! iperf3 exporter - Prometheus exporter for iperf3 network throughput probes.
//!
//! Each scrape of the probe endpoint runs one iperf3 client test against the
//! requested target and exposes the results as gauges.

mod collector;
mod config;
mod probe;
mod validation;
mod web;

use config::{ExporterConfig, LogFormat};
use web::Server;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let cfg = ExporterConfig::load()?;

    // Initialize logging
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("iperf3_exporter={}", cfg.log_level).parse()?)
        .add_directive(format!("tower_http={}", cfg.log_level).parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    match cfg.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Logfmt => registry.with(fmt::layer()).init(),
    }

    tracing::info!("Starting iperf3 exporter version {}", env!("CARGO_PKG_VERSION"));

    // Refuse to start without the measurement binary
    match probe::check_iperf3_exists(&cfg.iperf3_path) {
        Ok(path) => tracing::info!("Using iperf3 at {}", path.display()),
        Err(e) => {
            tracing::error!("iperf3 command not found: {}", e);
            return Err(e.into());
        }
    }

    // Start web server
    let server = Server::new(cfg)?;
    server.start().await?;

    Ok(())
}
