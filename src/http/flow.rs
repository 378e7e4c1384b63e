//! Read/write back-pressure shared by a connection and its response cycles.

use std::sync::Arc;

use tokio::sync::watch;

/// Request body bytes buffered for the handler before reading pauses.
pub const HIGH_WATER_LIMIT: usize = 65536;

/// Two independent `writable`/`paused` switches.
///
/// The write side is flipped by the transport as its outgoing buffer fills and
/// drains; response cycles call [`FlowControl::drain`] before writing. The read
/// side is flipped by the connection driver and the cycles, and honoured by the
/// driver's read loop.
#[derive(Debug, Clone)]
pub struct FlowControl {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    writable: watch::Sender<bool>,
    readable: watch::Sender<bool>,
}

fn set(tx: &watch::Sender<bool>, value: bool) -> bool {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

impl FlowControl {
    pub fn new() -> Self {
        let (writable, _) = watch::channel(true);
        let (readable, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner { writable, readable }),
        }
    }

    pub fn write_paused(&self) -> bool {
        !*self.inner.writable.borrow()
    }

    pub fn pause_writing(&self) {
        if set(&self.inner.writable, false) {
            tracing::trace!("write paused");
        }
    }

    pub fn resume_writing(&self) {
        if set(&self.inner.writable, true) {
            tracing::trace!("write resumed");
        }
    }

    /// Suspends until writing is no longer paused.
    pub async fn drain(&self) {
        let mut rx = self.inner.writable.subscribe();
        let _ = rx.wait_for(|writable| *writable).await;
    }

    pub fn read_paused(&self) -> bool {
        !*self.inner.readable.borrow()
    }

    pub fn pause_reading(&self) {
        if set(&self.inner.readable, false) {
            tracing::trace!("read paused");
        }
    }

    pub fn resume_reading(&self) {
        if set(&self.inner.readable, true) {
            tracing::trace!("read resumed");
        }
    }

    /// Suspends until reading is no longer paused.
    pub async fn wait_readable(&self) {
        let mut rx = self.inner.readable.subscribe();
        let _ = rx.wait_for(|readable| *readable).await;
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}
