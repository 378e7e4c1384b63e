//! The application side of the request/response event protocol.
//!
//! A handler receives the request [`Scope`] plus a [`RequestReceiver`] and a
//! [`ResponseSender`], and completes when the response has been sent. Async
//! closures implement [`Application`] directly:
//!
//! ```ignore
//! use h1_trailers::app::Application;
//! use h1_trailers::http::event::SendEvent;
//!
//! let app = |_scope, _receive, send: ResponseSender| async move {
//!     send.send(SendEvent::start(204, vec![])).await?;
//!     send.send(SendEvent::body("", false)).await?;
//!     Ok(())
//! };
//! ```

pub mod response;
pub mod streaming;

use std::future::Future;
use std::pin::Pin;

use crate::http::cycle::{RequestReceiver, ResponseSender};
use crate::http::scope::Scope;

pub use response::{Response, ResponseBuilder, service_unavailable};
pub use streaming::StreamingResponse;

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

pub trait Application: Send + Sync + 'static {
    fn call(&self, scope: Scope, receive: RequestReceiver, send: ResponseSender) -> HandlerFuture;
}

impl<F, Fut> Application for F
where
    F: Fn(Scope, RequestReceiver, ResponseSender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, scope: Scope, receive: RequestReceiver, send: ResponseSender) -> HandlerFuture {
        Box::pin(self(scope, receive, send))
    }
}
