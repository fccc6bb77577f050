//! Web server module.

mod handlers;

use crate::collector::ExporterMetrics;
use crate::config::ExporterConfig;
use crate::probe::{IperfRunner, Runner};

use axum::{routing::get, Router};
use prometheus::Registry;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to register exporter metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("HTTP server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ExporterConfig,
    pub runner: Arc<dyn Runner>,
    pub metrics: ExporterMetrics,
    /// Registry rendered on the metrics path.
    pub registry: Registry,
}

/// Web server for the iperf3 exporter.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a server that runs the configured iperf3 binary and exposes the
    /// process-wide metrics through the default registry.
    pub fn new(config: ExporterConfig) -> Result<Self, ServerError> {
        let runner = Arc::new(IperfRunner::new(config.iperf3_path.clone()));
        Self::with_parts(
            config,
            runner,
            ExporterMetrics::global().clone(),
            prometheus::default_registry().clone(),
        )
    }

    /// Create a server from explicit dependencies. `metrics` is registered into
    /// `registry`.
    pub fn with_parts(
        config: ExporterConfig,
        runner: Arc<dyn Runner>,
        metrics: ExporterMetrics,
        registry: Registry,
    ) -> Result<Self, ServerError> {
        metrics.register(&registry)?;
        Ok(Self {
            state: AppState {
                config,
                runner,
                metrics,
                registry,
            },
        })
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let config = &self.state.config;

        Router::new()
            .route("/", get(handlers::handle_index))
            .route(&config.probe_path, get(handlers::handle_probe))
            .route(&config.metrics_path, get(handlers::handle_metrics))
            .route("/health", get(handlers::handle_health))
            .route("/ready", get(handlers::handle_ready))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
            )
            .with_state(self.state.clone())
    }

    /// Start the server on the configured address and serve until SIGINT or SIGTERM.
    pub async fn start(&self) -> Result<(), ServerError> {
        let addr = self.state.config.listen_address;
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);
        tracing::info!(
            "Probe path {}, metrics path {}",
            self.state.config.probe_path,
            self.state.config.metrics_path
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Web server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
