//! Counters and settings shared by every connection of one server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::http::event::Header;

#[derive(Debug, Default)]
pub struct ServerState {
    connections: AtomicUsize,
    active_tasks: AtomicUsize,
    total_requests: AtomicU64,
    default_headers: Arc<[Header]>,
}

impl ServerState {
    pub fn new(default_headers: Vec<Header>) -> Self {
        Self {
            default_headers: default_headers.into(),
            ..Self::default()
        }
    }

    pub fn default_headers(&self) -> Arc<[Header]> {
        self.default_headers.clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Response tasks currently running an application handler.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::SeqCst)
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts a running response task until the guard drops.
    pub fn track_task(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard(self.clone())
    }

    /// Counts an open connection until the guard drops.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard(self.clone())
    }
}

#[derive(Debug)]
pub struct TaskGuard(Arc<ServerState>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct ConnectionGuard(Arc<ServerState>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}
