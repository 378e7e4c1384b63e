//! HTTP/1.1 protocol implementation.
//!
//! # Architecture
//!
//! - **`connection`**: per-connection driver; parses requests, queues pipelined ones, handles keep-alive and shutdown
//! - **`cycle`**: one request's response state machine, shared with the application handler
//! - **`parser`**: incremental request parser behind a callback trait
//! - **`transport`**: queued writer task for the outgoing half of the stream
//! - **`flow`**: read and write back-pressure switches
//! - **`trailers`**: adapts trailer sources into response trailer events
//! - **`scope`**, **`event`**, **`headers`**, **`status`**: request metadata, protocol events and header/status helpers
//!
//! # Connection lifecycle
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← bytes fed to the parser
//!        └──────┬──────┘
//!               │ headers complete
//!               ▼
//!        ┌──────────────────┐   another cycle still writing
//!        │  Admit / Queue   │ ─────────────────────────────┐
//!        └──────┬───────────┘                              ▼
//!               │ idle                               ┌───────────┐
//!               ▼                                    │  Pipeline │
//!        ┌──────────────────┐   response complete    └─────┬─────┘
//!        │   Active cycle   │ ◀──────────────────────────────┘
//!        └──────┬───────────┘
//!               │ response complete
//!               ├─ Keep-Alive → Reading (idle timer armed)
//!               └─ Close → Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use h1_trailers::app::Response;
//! use h1_trailers::config::Config;
//! use h1_trailers::server::listener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     let app = std::sync::Arc::new(Response::ok("hello\n"));
//!     listener::run(Config::default(), app, shutdown).await
//! }
//! ```

pub mod connection;
pub mod cycle;
pub mod event;
pub mod flow;
pub mod headers;
pub mod parser;
pub mod scope;
pub mod status;
pub mod trailers;
pub mod transport;
