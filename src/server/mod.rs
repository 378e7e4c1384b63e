//! Listening socket, connection bookkeeping, and graceful shutdown.

pub mod listener;
pub mod state;

use tokio::sync::watch;

/// Resolves once `rx` turns true. A dropped sender means nobody will ever
/// ask for shutdown, so this then waits forever.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
