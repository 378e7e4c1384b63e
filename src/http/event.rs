//! Events exchanged between a response cycle and the application handler.

use bytes::Bytes;

/// A header name/value pair as raw bytes.
pub type Header = (Bytes, Bytes);

/// Event handed to the application by `receive()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// A slice of the request body. `more_body == false` marks the last one.
    Request { body: Bytes, more_body: bool },
    /// The client went away, or the response already completed. Terminal.
    Disconnect,
}

impl ReceiveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ReceiveEvent::Request { .. } => "http.request",
            ReceiveEvent::Disconnect => "http.disconnect",
        }
    }
}

/// Event passed by the application to `send()`.
///
/// Must arrive in the order `Start`, `Body`*, then `Trailers`* if the start
/// event declared `trailers: true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    Start {
        status: u16,
        headers: Vec<Header>,
        trailers: bool,
    },
    Body {
        body: Bytes,
        more_body: bool,
    },
    Trailers {
        headers: Vec<Header>,
        more_trailers: bool,
    },
}

impl SendEvent {
    pub fn start(status: u16, headers: Vec<Header>) -> Self {
        SendEvent::Start {
            status,
            headers,
            trailers: false,
        }
    }

    pub fn start_with_trailers(status: u16, headers: Vec<Header>) -> Self {
        SendEvent::Start {
            status,
            headers,
            trailers: true,
        }
    }

    pub fn body(body: impl Into<Bytes>, more_body: bool) -> Self {
        SendEvent::Body {
            body: body.into(),
            more_body,
        }
    }

    pub fn trailers(headers: Vec<Header>, more_trailers: bool) -> Self {
        SendEvent::Trailers {
            headers,
            more_trailers,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SendEvent::Start { .. } => "http.response.start",
            SendEvent::Body { .. } => "http.response.body",
            SendEvent::Trailers { .. } => "http.response.trailers",
        }
    }
}
