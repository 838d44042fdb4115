//! HTTP listener setup with graceful shutdown.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::error::{DaemonError, DaemonResult};

/// Binds `addr` and serves `router` until the shutdown signal fires.
///
/// The decision listener needs the peer address for the last-resort IP
/// fallback, so connect info is always attached.
///
/// # Errors
///
/// Returns [`DaemonError::Bind`] when the listener cannot be bound and a
/// server error if serving fails later.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    name: &'static str,
    mut shutdown: watch::Receiver<bool>,
) -> DaemonResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind { addr, source })?;

    info!(addr = %addr, server = name, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })
    .await?;

    info!(server = name, "shut down");
    Ok(())
}
