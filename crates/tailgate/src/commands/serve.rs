//! Serve command implementation
//!
//! Runs the HTTP control API for the configured environment until Ctrl-C or
//! SIGTERM.

use anyhow::Result;
use std::sync::Arc;
use tailgate_core::http;
use tailgate_core::service::TailscaleService;
use tracing::{info, instrument, warn};

/// Execute the serve command
#[instrument(skip(service), fields(environment = %service.default_environment()))]
pub async fn execute_serve(service: Arc<TailscaleService>) -> Result<()> {
    if let Err(e) = service.check_docker().await {
        // the API still answers, every container call will report the error
        warn!("{}", e);
    }

    let listen = service.config().listen;
    info!(
        "Serving environment {} ({})",
        service.default_environment(),
        service.identity(service.default_environment())?.container_name
    );
    http::serve(service, listen, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
