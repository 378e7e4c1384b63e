use std::sync::Arc;

use bytes::Bytes;

use crate::app::{Application, HandlerFuture};
use crate::http::cycle::{RequestReceiver, ResponseSender};
use crate::http::event::{Header, SendEvent};
use crate::http::headers::header;
use crate::http::scope::Scope;

/// A complete, buffered HTTP response sent with `content-length` framing.
///
/// Contains the HTTP status code, headers, and response body. Cheap to clone,
/// so one value can be mounted as an [`Application`] and served repeatedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The HTTP status code
    pub status: u16,
    /// Headers in the order they will be written
    pub headers: Vec<Header>,
    /// Response body as bytes
    pub body: Bytes,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```
/// # use h1_trailers::app::ResponseBuilder;
/// let response = ResponseBuilder::new(200)
///     .media_type("application/json")
///     .body("{}")
///     .build();
/// assert_eq!(response.header(b"content-length").unwrap(), "2");
/// ```
#[derive(Debug)]
pub struct ResponseBuilder {
    status: u16,
    headers: Vec<Header>,
    media_type: Option<String>,
    body: Bytes,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            media_type: None,
            body: Bytes::new(),
        }
    }

    /// Adds a header. Names are lower-cased when written.
    pub fn header(mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.headers.push(header(key, value));
        self
    }

    /// Sets `content-type`; text types get a `charset=utf-8` suffix.
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the final Response.
    ///
    /// Adds `content-length` from the body size unless one was given, and
    /// skips it for statuses that never carry a body.
    pub fn build(mut self) -> Response {
        let bodyless = self.status < 200 || self.status == 204 || self.status == 304;
        if !bodyless && !has_header(&self.headers, b"content-length") {
            self.headers
                .push(header("content-length", self.body.len().to_string()));
        }
        if let Some(media_type) = self.media_type {
            if !has_header(&self.headers, b"content-type") {
                let value = if media_type.starts_with("text/") {
                    format!("{media_type}; charset=utf-8")
                } else {
                    media_type
                };
                self.headers.push(header("content-type", value));
            }
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

fn has_header(headers: &[Header], name: &[u8]) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

impl Response {
    /// Creates a simple 200 OK plain-text response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(200)
            .media_type("text/plain")
            .body(body)
            .build()
    }

    /// Creates a response with no body, e.g. `204`.
    pub fn empty(status: u16) -> Self {
        ResponseBuilder::new(status).build()
    }

    pub fn header(&self, name: &[u8]) -> Option<&Bytes> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Sends this response as one start event and one body event.
    pub async fn send(&self, send: &ResponseSender) -> anyhow::Result<()> {
        send.send(SendEvent::start(self.status, self.headers.clone()))
            .await?;
        send.send(SendEvent::body(self.body.clone(), false)).await?;
        Ok(())
    }
}

impl Application for Response {
    fn call(&self, _scope: Scope, _receive: RequestReceiver, send: ResponseSender) -> HandlerFuture {
        let response = self.clone();
        Box::pin(async move { response.send(&send).await })
    }
}

/// Handler substituted for the application when the concurrency limit is hit.
pub fn service_unavailable() -> Arc<dyn Application> {
    let response = ResponseBuilder::new(503)
        .media_type("text/plain")
        .header("connection", "close")
        .body("Service Unavailable")
        .build();
    Arc::new(response)
}
