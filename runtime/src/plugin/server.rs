//! Plugin-side serving helpers.
//!
//! A plugin binary builds its router through the [`EndpointBuilder`], then
//! hands it to one of these helpers. The discovery contract: print a single
//! address line to stdout once the listener is bound, serve `/healthz`, and
//! exit on SIGINT.

use std::path::Path;

use axum::Router;

use ocmr_core::error::{OcmError, Result};

/// Serve the plugin router on a unix domain socket.
///
/// Prints `http+unix://<path>` to stdout after binding. Runs until SIGINT.
pub async fn serve_unix(router: Router, socket_path: &Path) -> Result<()> {
    // A stale socket from a previous run blocks the bind.
    if socket_path.exists() {
        std::fs::remove_file(socket_path).map_err(OcmError::IoError)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).map_err(OcmError::IoError)?;
    }

    let listener = tokio::net::UnixListener::bind(socket_path).map_err(|e| {
        OcmError::TransportError(format!(
            "failed to bind {}: {}",
            socket_path.display(),
            e
        ))
    })?;

    announce(&format!("http+unix://{}", socket_path.display()));
    tracing::info!(socket = %socket_path.display(), "plugin listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| OcmError::TransportError(format!("server error: {}", e)))
}

/// Serve the plugin router on a TCP address such as `127.0.0.1:0`.
///
/// Prints `http://<bound-address>` to stdout after binding, so an ephemeral
/// port is announced as the resolved port. Runs until SIGINT.
pub async fn serve_tcp(router: Router, address: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await.map_err(|e| {
        OcmError::TransportError(format!("failed to bind {}: {}", address, e))
    })?;
    let bound = listener
        .local_addr()
        .map_err(|e| OcmError::TransportError(format!("failed to resolve bound address: {}", e)))?;

    announce(&format!("http://{}", bound));
    tracing::info!(address = %bound, "plugin listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| OcmError::TransportError(format!("server error: {}", e)))
}

/// The manager scans stdout for this line; it must go out before the first
/// health probe can succeed and must not be buffered.
fn announce(address: &str) {
    use std::io::Write;
    println!("{}", address);
    let _ = std::io::stdout().flush();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install SIGINT handler");
    }
}
