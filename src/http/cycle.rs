//! One request's lifecycle, from parsed head to completed response.
//!
//! ```text
//!   AwaitingStart ──start──▶ StreamingBody ──body(more=false)──┬──▶ Complete
//!                                 │  ▲                          │
//!                                 └──┘ body(more=true)          └──▶ StreamingTrailers
//!                                                                    │  ▲
//!                                          trailers(more=false) ◀────┘  └ trailers(more=true)
//! ```
//!
//! Any event out of this order is rejected with a [`CycleError`] and the
//! connection is closed once the handler finishes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::{Notify, mpsc};

use crate::app::Application;
use crate::error::CycleError;
use crate::http::event::{Header, ReceiveEvent, SendEvent};
use crate::http::flow::{FlowControl, HIGH_WATER_LIMIT};
use crate::http::headers::{self, header};
use crate::http::scope::Scope;
use crate::http::status;
use crate::http::transport::Transport;

const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";
const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// Sent to the connection driver when a cycle finishes its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleNotice {
    ResponseComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingStart,
    StreamingBody,
    StreamingTrailers,
    Complete,
}

/// Per-request settings decided by the driver when the head is parsed.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub access_log: bool,
    pub default_headers: Arc<[Header]>,
    pub expect_100_continue: bool,
    /// Client sent `TE: trailers`.
    pub expect_trailers: bool,
    pub keep_alive: bool,
}

#[derive(Debug)]
struct CycleState {
    phase: Phase,
    waiting_for_100_continue: bool,
    send_trailers: bool,
    /// `None` until the start event decides the framing.
    chunked_encoding: Option<bool>,
    expected_content_length: u64,
    keep_alive: bool,
    disconnected: bool,
    body: BytesMut,
    more_body: bool,
    on_response: Option<mpsc::UnboundedSender<CycleNotice>>,
}

impl CycleState {
    fn response_started(&self) -> bool {
        self.phase != Phase::AwaitingStart
    }

    fn response_complete(&self) -> bool {
        matches!(self.phase, Phase::StreamingTrailers | Phase::Complete)
    }
}

#[derive(Debug)]
pub struct RequestResponseCycle {
    scope: Scope,
    transport: Transport,
    flow: FlowControl,
    access_log: bool,
    default_headers: Arc<[Header]>,
    expect_trailers: bool,
    message_event: Notify,
    state: Mutex<CycleState>,
}

impl RequestResponseCycle {
    pub fn new(
        scope: Scope,
        transport: Transport,
        flow: FlowControl,
        settings: CycleSettings,
        on_response: mpsc::UnboundedSender<CycleNotice>,
    ) -> Self {
        Self {
            scope,
            transport,
            flow,
            access_log: settings.access_log,
            default_headers: settings.default_headers,
            expect_trailers: settings.expect_trailers,
            message_event: Notify::new(),
            state: Mutex::new(CycleState {
                phase: Phase::AwaitingStart,
                waiting_for_100_continue: settings.expect_100_continue,
                send_trailers: false,
                chunked_encoding: None,
                expected_content_length: 0,
                keep_alive: settings.keep_alive,
                disconnected: false,
                body: BytesMut::new(),
                more_body: true,
                on_response: Some(on_response),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn response_started(&self) -> bool {
        self.state().response_started()
    }

    /// Nothing more will be written for this request.
    pub fn is_finished(&self) -> bool {
        self.state().phase == Phase::Complete
    }

    pub fn is_disconnected(&self) -> bool {
        self.state().disconnected
    }

    // Driver-side hooks.

    /// Buffers request body bytes for the handler. Returns true when the
    /// buffer is above the high-water mark and reading should pause.
    pub fn push_body(&self, chunk: &[u8]) -> bool {
        let mut state = self.state();
        if state.response_complete() {
            return false;
        }
        state.body.extend_from_slice(chunk);
        let over = state.body.len() > HIGH_WATER_LIMIT;
        self.message_event.notify_one();
        over
    }

    pub fn finish_body(&self) {
        let mut state = self.state();
        if state.response_complete() {
            return;
        }
        state.more_body = false;
        self.message_event.notify_one();
    }

    /// The transport went away.
    pub fn disconnect(&self) {
        let mut state = self.state();
        if !state.response_complete() {
            state.disconnected = true;
        }
        self.message_event.notify_one();
    }

    /// Server shutdown: finish the current response, then close.
    pub fn shutdown(&self) {
        self.state().keep_alive = false;
    }

    /// Runs `app` to completion, recovering from handler faults.
    pub async fn run(self: Arc<Self>, app: Arc<dyn Application>) {
        let receive = RequestReceiver {
            cycle: self.clone(),
        };
        let send = ResponseSender {
            cycle: self.clone(),
        };
        let handler = tokio::spawn(app.call(self.scope.clone(), receive, send));

        match handler.await {
            Ok(Ok(())) => {
                let (started, complete, disconnected) = {
                    let state = self.state();
                    (state.response_started(), state.phase == Phase::Complete, state.disconnected)
                };
                if !started && !disconnected {
                    tracing::error!("application returned without starting response");
                    self.send_500_response().await;
                } else if !complete && !disconnected {
                    tracing::error!("application returned without completing response");
                    self.transport.close();
                }
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "exception in application");
                self.recover().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "application task failed");
                self.recover().await;
            }
        }

        self.state().on_response = None;
    }

    async fn recover(&self) {
        if self.response_started() {
            self.transport.close();
        } else {
            self.send_500_response().await;
        }
    }

    async fn send_500_response(&self) {
        let start = SendEvent::start(
            500,
            vec![
                header("content-type", "text/plain; charset=utf-8"),
                header("content-length", INTERNAL_ERROR_BODY.len().to_string()),
                headers::close_header(),
            ],
        );
        let events = [start, SendEvent::body(INTERNAL_ERROR_BODY, false)];
        for event in events {
            if let Err(err) = self.send(event).await {
                tracing::debug!(error = %err, "failed to send 500 response");
                self.transport.close();
                return;
            }
        }
    }

    pub async fn receive(&self) -> ReceiveEvent {
        let wait = {
            let mut state = self.state();
            if state.waiting_for_100_continue && !self.transport.is_closing() {
                self.transport.write(CONTINUE_RESPONSE);
                state.waiting_for_100_continue = false;
            }
            !state.disconnected && !state.response_complete()
        };

        if wait {
            self.flow.resume_reading();
            self.message_event.notified().await;
        }

        let mut state = self.state();
        if state.disconnected || state.response_complete() {
            return ReceiveEvent::Disconnect;
        }
        ReceiveEvent::Request {
            body: state.body.split().freeze(),
            more_body: state.more_body,
        }
    }

    pub async fn send(&self, event: SendEvent) -> Result<(), CycleError> {
        let must_drain = self.flow.write_paused() && !self.is_disconnected();
        if must_drain {
            self.flow.drain().await;
        }

        let mut state = self.state();
        let result = self.dispatch(&mut state, event);
        if result.is_err() {
            state.keep_alive = false;
        }
        result
    }

    fn dispatch(&self, state: &mut CycleState, event: SendEvent) -> Result<(), CycleError> {
        if state.disconnected {
            return Ok(());
        }
        match (state.phase, event) {
            (Phase::AwaitingStart, SendEvent::Start { status, headers, trailers }) => {
                self.start_response(state, status, headers, trailers)
            }
            (Phase::AwaitingStart, other) => Err(CycleError::ExpectedStart(other.kind())),
            (Phase::StreamingBody, SendEvent::Body { body, more_body }) => {
                self.write_body(state, body, more_body)
            }
            (Phase::StreamingBody, other) => Err(CycleError::ExpectedBody(other.kind())),
            (Phase::StreamingTrailers, SendEvent::Trailers { headers, more_trailers }) => {
                self.write_trailers(state, headers, more_trailers)
            }
            (Phase::StreamingTrailers, other) => Err(CycleError::ExpectedTrailers(other.kind())),
            (Phase::Complete, other) => Err(CycleError::AlreadyCompleted(other.kind())),
        }
    }

    fn start_response(
        &self,
        state: &mut CycleState,
        status: u16,
        app_headers: Vec<Header>,
        trailers: bool,
    ) -> Result<(), CycleError> {
        let status_line = status::status_line(status).ok_or(CycleError::InvalidStatus(status))?;

        let mut response_headers: Vec<Header> = self.default_headers.to_vec();
        response_headers.extend(app_headers);
        if self.scope.has_close_header()
            && !response_headers.iter().any(|(n, v)| headers::is_close(n, v))
        {
            response_headers.push(headers::close_header());
        }

        let mut content = BytesMut::with_capacity(256);
        content.extend_from_slice(&status_line);

        let mut chunked_encoding = None;
        let mut expected_content_length = 0;
        let mut keep_alive = state.keep_alive;

        for (name, value) in &response_headers {
            headers::validate(name, value)?;
            let name = name.to_ascii_lowercase();
            if name == b"content-length" && chunked_encoding.is_none() {
                expected_content_length = headers::parse_content_length(value)?;
                chunked_encoding = Some(false);
            } else if name == b"transfer-encoding" && value.eq_ignore_ascii_case(b"chunked") {
                expected_content_length = 0;
                chunked_encoding = Some(true);
            } else if headers::is_close(&name, value) {
                keep_alive = false;
            }
            content.extend_from_slice(&name);
            content.extend_from_slice(b": ");
            content.extend_from_slice(value);
            content.extend_from_slice(b"\r\n");
        }

        let is_head = self.scope.is_head();
        if chunked_encoding.is_none() {
            if !is_head && status != 204 && status != 304 {
                chunked_encoding = Some(true);
                content.extend_from_slice(b"transfer-encoding: chunked\r\n");
            } else {
                // No body is permitted.
                chunked_encoding = Some(false);
            }
        }
        content.extend_from_slice(b"\r\n");

        state.phase = Phase::StreamingBody;
        state.waiting_for_100_continue = false;
        state.chunked_encoding = chunked_encoding;
        state.expected_content_length = expected_content_length;
        state.keep_alive = keep_alive;
        state.send_trailers = trailers && !is_head;

        if self.access_log {
            tracing::info!(
                target: "h1_trailers::access",
                "{} - \"{} {} HTTP/{}\" {}",
                self.scope.client_addr(),
                self.scope.method,
                self.scope.path_with_query_string(),
                self.scope.http_version.as_str(),
                status
            );
        }

        self.transport.write(content.freeze());
        Ok(())
    }

    /// Trailer bytes reach the wire only for chunked responses to clients
    /// that sent `TE: trailers`.
    fn trailers_on_wire(&self, state: &CycleState) -> bool {
        state.send_trailers && self.expect_trailers && state.chunked_encoding == Some(true)
    }

    fn write_body(&self, state: &mut CycleState, body: Bytes, more_body: bool) -> Result<(), CycleError> {
        if self.scope.is_head() {
            state.expected_content_length = 0;
        } else if state.chunked_encoding == Some(true) {
            let mut content = BytesMut::with_capacity(body.len() + 16);
            if !body.is_empty() {
                content.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
                content.extend_from_slice(&body);
                content.extend_from_slice(b"\r\n");
            }
            if !more_body {
                if self.trailers_on_wire(state) {
                    content.extend_from_slice(b"0\r\n");
                } else {
                    content.extend_from_slice(b"0\r\n\r\n");
                }
            }
            self.transport.write(content.freeze());
        } else {
            let num_bytes = body.len() as u64;
            if num_bytes > state.expected_content_length {
                return Err(CycleError::ContentTooLong);
            }
            state.expected_content_length -= num_bytes;
            self.transport.write(body);
        }

        if !more_body {
            if state.expected_content_length != 0 {
                return Err(CycleError::ContentTooShort);
            }
            self.message_event.notify_one();
            if state.send_trailers {
                state.phase = Phase::StreamingTrailers;
            } else {
                state.phase = Phase::Complete;
                self.finalize(state);
            }
        }
        Ok(())
    }

    fn write_trailers(
        &self,
        state: &mut CycleState,
        trailers: Vec<Header>,
        more_trailers: bool,
    ) -> Result<(), CycleError> {
        let mut content = BytesMut::new();
        for (name, value) in &trailers {
            headers::validate(name, value)?;
            let name = name.to_ascii_lowercase();
            if headers::is_close(&name, value) {
                state.keep_alive = false;
            }
            content.extend_from_slice(&name);
            content.extend_from_slice(b": ");
            content.extend_from_slice(value);
            content.extend_from_slice(b"\r\n");
        }
        if !more_trailers {
            content.extend_from_slice(b"\r\n");
        }

        if self.trailers_on_wire(state) {
            self.transport.write(content.freeze());
        }

        if !more_trailers {
            state.send_trailers = false;
            state.phase = Phase::Complete;
            self.finalize(state);
        }
        Ok(())
    }

    fn finalize(&self, state: &mut CycleState) {
        if !state.keep_alive {
            self.transport.close();
        }
        if let Some(on_response) = state.on_response.take() {
            let _ = on_response.send(CycleNotice::ResponseComplete);
        }
    }
}

/// The handler's `receive` half.
#[derive(Debug, Clone)]
pub struct RequestReceiver {
    cycle: Arc<RequestResponseCycle>,
}

impl RequestReceiver {
    /// Next body chunk, or `Disconnect` once the client is gone or the
    /// response has completed.
    pub async fn receive(&self) -> ReceiveEvent {
        self.cycle.receive().await
    }

    /// True only when the client actually went away.
    pub fn is_disconnected(&self) -> bool {
        self.cycle.is_disconnected()
    }
}

/// The handler's `send` half.
#[derive(Debug, Clone)]
pub struct ResponseSender {
    cycle: Arc<RequestResponseCycle>,
}

impl ResponseSender {
    pub async fn send(&self, event: SendEvent) -> Result<(), CycleError> {
        self.cycle.send(event).await
    }
}
