//! Local HTTP listener plumbing shared by both transports.
//!
//! Bind-then-report: the listener is bound before anything is spawned so the
//! real address (including an OS-assigned port) is known up front.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use thv_core::{TransportError, authority};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Extra time allowed for in-flight responses to finish after cancellation.
pub(crate) const DRAIN_MARGIN: Duration = Duration::from_secs(2);

/// Check that `host`/`port` resolve to a socket address, without binding.
pub(crate) async fn validate_listen_address(host: &str, port: u16) -> Result<(), TransportError> {
    let address = authority(host, port);
    let mut resolved = tokio::net::lookup_host(&address)
        .await
        .map_err(|e| TransportError::InvalidConfig(format!("invalid listen address {address}: {e}")))?;
    if resolved.next().is_none() {
        return Err(TransportError::InvalidConfig(format!(
            "listen address {address} did not resolve"
        )));
    }
    Ok(())
}

pub(crate) async fn bind(host: &str, port: u16) -> Result<(TcpListener, SocketAddr), TransportError> {
    let address = authority(host, port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| TransportError::Bind {
            address: address.clone(),
            reason: e.to_string(),
        })?;
    let bound = listener.local_addr()?;
    info!(%bound, "Transport listener bound");
    Ok((listener, bound))
}

/// Serve `router` until `cancel` fires.
pub(crate) fn spawn(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> JoinHandle<io::Result<()>> {
    tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await;
        match &result {
            Ok(()) => debug!("Transport listener closed"),
            Err(e) => error!(error = %e, "Transport listener failed"),
        }
        result
    })
}

/// Wait for a server task after cancellation, aborting it if it overruns.
pub(crate) async fn join(handle: JoinHandle<io::Result<()>>, within: Duration) {
    let mut handle = handle;
    match tokio::time::timeout(within, &mut handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "Transport listener ended with error"),
        Ok(Err(join_err)) => warn!(error = %join_err, "Transport listener task panicked"),
        Err(_) => {
            warn!("Transport listener did not drain in time; aborting");
            handle.abort();
        }
    }
}

/// `GET /health`
pub(crate) async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// JSON error body `{"error": "..."}`.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
