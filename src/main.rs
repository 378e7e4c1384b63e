use std::sync::Arc;

use bytes::BytesMut;
use h1_trailers::app::StreamingResponse;
use h1_trailers::config::Config;
use h1_trailers::http::cycle::{RequestReceiver, ResponseSender};
use h1_trailers::http::event::ReceiveEvent;
use h1_trailers::http::scope::Scope;
use h1_trailers::http::trailers::TrailerStream;
use h1_trailers::server::listener;
use tokio::sync::watch;

/// Echoes the request body back, reporting its length in a trailer.
async fn echo(scope: Scope, receive: RequestReceiver, send: ResponseSender) -> anyhow::Result<()> {
    let mut body = BytesMut::new();
    loop {
        match receive.receive().await {
            ReceiveEvent::Request { body: chunk, more_body } => {
                body.extend_from_slice(&chunk);
                if !more_body {
                    break;
                }
            }
            ReceiveEvent::Disconnect => return Ok(()),
        }
    }

    let length = body.len().to_string();
    StreamingResponse::from_chunks([body.freeze()])
        .header("content-type", "application/octet-stream")
        .header("trailer", "x-body-length")
        .trailers(TrailerStream::from_pairs([("x-body-length", length)]))
        .respond(&scope, receive, send)
        .await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    listener::run(cfg, Arc::new(echo), shutdown_rx).await
}
