use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::app::Application;
use crate::config::Config;
use crate::http::connection::{Connection, ConnectionContext};
use crate::server::shutdown_requested;
use crate::server::state::ServerState;

/// Binds `cfg.listen_addr` and serves until `shutdown` turns true.
pub async fn run(
    cfg: Config,
    app: Arc<dyn Application>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    serve(listener, cfg, app, shutdown).await
}

/// Accepts connections on an already bound listener.
///
/// On shutdown the listener is closed first, then open connections get
/// `timeout_graceful_shutdown` to finish before they are aborted.
pub async fn serve(
    listener: TcpListener,
    cfg: Config,
    app: Arc<dyn Application>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let state = Arc::new(ServerState::new(cfg.default_headers()?));
    let cfg = Arc::new(cfg);
    let ctx = ConnectionContext {
        config: cfg.clone(),
        state: state.clone(),
        app,
        shutdown: shutdown.clone(),
    };
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = shutdown_requested(&mut shutdown) => break,
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                tracing::debug!("Accepted connection from {}", peer);

                let local = socket.local_addr().ok();
                let conn = Connection::new(socket, ctx.clone(), Some(peer), local);
                connections.spawn(async move {
                    if let Err(e) = conn.run().await {
                        tracing::error!("Connection error from {}: {}", peer, e);
                    }
                });
            }
            Some(joined) = connections.join_next() => log_join(joined),
        }
    }

    info!("Shutting down");
    drop(listener);

    match cfg.timeout_graceful_shutdown() {
        Some(limit) => {
            if tokio::time::timeout(limit, drain(&mut connections)).await.is_err() {
                warn!("Cancel {} running connection(s)", connections.len());
                connections.shutdown().await;
            }
        }
        None => drain(&mut connections).await,
    }

    info!(
        total_requests = state.total_requests(),
        "Finished serving"
    );
    Ok(())
}

async fn drain(connections: &mut JoinSet<()>) {
    while let Some(joined) = connections.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!("Connection task panicked: {}", e);
        }
    }
}
