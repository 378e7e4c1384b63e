//! Outgoing side of a connection.
//!
//! Writes are queued to a dedicated writer task so that callers never block.
//! The number of queued bytes drives the write half of [`FlowControl`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::http::flow::FlowControl;

/// Queued bytes above which writers are asked to pause.
pub const WRITE_HIGH_WATER: usize = 64 * 1024;
/// Queued bytes at or below which paused writers are released.
pub const WRITE_LOW_WATER: usize = 16 * 1024;

enum Command {
    Write(Bytes),
    Close,
}

#[derive(Debug)]
struct Shared {
    closing: AtomicBool,
    aborted: AtomicBool,
    buffered: AtomicUsize,
    closed: watch::Sender<bool>,
    flow: FlowControl,
}

/// Cloneable handle to a connection's writer task.
#[derive(Debug, Clone)]
pub struct Transport {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Write(data) => write!(f, "Write({} bytes)", data.len()),
            Command::Close => f.write_str("Close"),
        }
    }
}

impl Transport {
    /// Starts the writer task for `writer`. Must be called inside a runtime.
    pub fn spawn<W>(writer: W, flow: FlowControl) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            closing: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            closed,
            flow,
        });
        let handle = tokio::spawn(write_loop(writer, rx, shared.clone()));
        (Self { tx, shared }, handle)
    }

    /// Queues bytes for the peer. Ignored once the transport is closing.
    pub fn write(&self, data: impl Into<Bytes>) {
        let data = data.into();
        if data.is_empty() || self.is_closing() {
            return;
        }
        let len = data.len();
        let buffered = self.shared.buffered.fetch_add(len, Ordering::SeqCst) + len;
        if self.tx.send(Command::Write(data)).is_err() {
            return;
        }
        if buffered > WRITE_HIGH_WATER {
            self.shared.flow.pause_writing();
        }
    }

    /// Flushes queued writes, then shuts the stream down.
    pub fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Command::Close);
        }
    }

    /// Drops queued writes and shuts the stream down.
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::SeqCst);
        self.shared.closing.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Command::Close);
        self.shared.flow.resume_writing();
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    /// Resolves once the writer task has shut the stream down.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Command>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        if shared.aborted.load(Ordering::SeqCst) {
            break;
        }
        match command {
            Command::Write(data) => {
                let len = data.len();
                let result = match writer.write_all(&data).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, "write failed, closing transport");
                    break;
                }
                let remaining = shared.buffered.fetch_sub(len, Ordering::SeqCst) - len;
                if remaining <= WRITE_LOW_WATER {
                    shared.flow.resume_writing();
                }
            }
            Command::Close => {
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!(error = %e, "shutdown failed");
                }
                break;
            }
        }
    }

    shared.closing.store(true, Ordering::SeqCst);
    shared.closed.send_replace(true);
    shared.flow.resume_writing();
}
