//! Per-connection driver.
//!
//! Reads bytes, feeds them to a [`Parser`], and turns the parser's callbacks
//! into [`RequestResponseCycle`]s. Only one cycle writes at a time; requests
//! pipelined behind it wait in a queue until it finishes.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::app::{Application, service_unavailable};
use crate::config::Config;
use crate::http::cycle::{CycleNotice, CycleSettings, RequestResponseCycle};
use crate::http::event::Header;
use crate::http::flow::FlowControl;
use crate::http::headers::{self, header};
use crate::http::parser::{HttpParser, ParseError, Parser, ParserEvents, RequestHead};
use crate::http::scope::{HttpVersion, ScopeBuilder};
use crate::http::transport::Transport;
use crate::server::shutdown_requested;
use crate::server::state::{ConnectionGuard, ServerState};

const INVALID_REQUEST_BODY: &str = "Invalid HTTP request received.";
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Everything a connection borrows from its server.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: Arc<Config>,
    pub state: Arc<ServerState>,
    pub app: Arc<dyn Application>,
    pub shutdown: watch::Receiver<bool>,
}

type Pending = (Arc<RequestResponseCycle>, Arc<dyn Application>);

pub struct Connection<S> {
    reader: ReadHalf<S>,
    parser: Box<dyn Parser>,
    driver: Driver,
    notices: mpsc::UnboundedReceiver<CycleNotice>,
    shutdown: watch::Receiver<bool>,
    _guard: ConnectionGuard,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Splits `stream` and starts its writer task. Must be called inside a
    /// runtime.
    pub fn new(
        stream: S,
        ctx: ConnectionContext,
        client: Option<SocketAddr>,
        server: Option<SocketAddr>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let flow = FlowControl::new();
        let (transport, _writer_task) = Transport::spawn(writer, flow.clone());
        let (notice_tx, notices) = mpsc::unbounded_channel();

        let driver = Driver {
            default_headers: ctx.state.default_headers(),
            config: ctx.config,
            server_state: ctx.state.clone(),
            app: ctx.app,
            transport,
            flow,
            client,
            server,
            notice_tx,
            headers: Vec::new(),
            expect_100_continue: false,
            expect_trailers: false,
            cycle: None,
            active: None,
            pipeline: VecDeque::new(),
            keep_alive_deadline: None,
            shutting_down: false,
            parse_failed: false,
        };

        Self {
            reader,
            parser: Box::new(HttpParser::new()),
            driver,
            notices,
            shutdown: ctx.shutdown,
            _guard: ctx.state.track_connection(),
        }
    }

    /// Replaces the default `httparse`-based parser.
    pub fn with_parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Serves requests until the connection closes.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let transport = self.driver.transport.clone();
        let flow = self.driver.flow.clone();

        loop {
            let deadline = self.driver.keep_alive_deadline;
            let read_paused = flow.read_paused();

            tokio::select! {
                biased;

                () = shutdown_requested(&mut self.shutdown), if !self.driver.shutting_down => {
                    self.driver.shutdown();
                }
                Some(notice) = self.notices.recv() => match notice {
                    CycleNotice::ResponseComplete => self.driver.on_response_complete(),
                },
                () = transport.closed() => break,
                () = sleep_until(deadline), if deadline.is_some() => {
                    tracing::debug!(client = ?self.driver.client, "keep-alive timeout");
                    self.driver.keep_alive_deadline = None;
                    transport.close();
                }
                () = flow.wait_readable(), if read_paused => {}
                read = self.reader.read_buf(&mut buf), if !read_paused => match read {
                    Ok(0) => {
                        self.driver.connection_lost(None);
                        break;
                    }
                    Ok(_) => {
                        self.driver.data_received(&mut *self.parser, &buf);
                        buf.clear();
                    }
                    Err(err) => {
                        self.driver.connection_lost(Some(&err));
                        break;
                    }
                },
            }
        }

        tracing::debug!(client = ?self.driver.client, "connection closed");
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Driver {
    config: Arc<Config>,
    server_state: Arc<ServerState>,
    default_headers: Arc<[Header]>,
    app: Arc<dyn Application>,
    transport: Transport,
    flow: FlowControl,
    client: Option<SocketAddr>,
    server: Option<SocketAddr>,
    notice_tx: mpsc::UnboundedSender<CycleNotice>,

    // Collected for the request currently being parsed.
    headers: Vec<Header>,
    expect_100_continue: bool,
    expect_trailers: bool,

    /// Most recently parsed request; receives body bytes.
    cycle: Option<Arc<RequestResponseCycle>>,
    /// The cycle allowed to write.
    active: Option<Arc<RequestResponseCycle>>,
    pipeline: VecDeque<Pending>,
    keep_alive_deadline: Option<Instant>,
    shutting_down: bool,
    parse_failed: bool,
}

impl Driver {
    fn data_received(&mut self, parser: &mut dyn Parser, data: &[u8]) {
        if self.parse_failed {
            return;
        }

        if let Err(err) = parser.feed(data, self) {
            self.parse_failed = true;
            self.send_400(&err);
        }
    }

    fn send_400(&mut self, err: &ParseError) {
        tracing::warn!(client = ?self.client, error = %err, "invalid HTTP request received");
        let mut content = BytesMut::from(&b"HTTP/1.1 400 Bad Request\r\n"[..]);
        let extra = [
            header("content-type", "text/plain; charset=utf-8"),
            header("content-length", INVALID_REQUEST_BODY.len().to_string()),
            headers::close_header(),
        ];
        for (name, value) in self.default_headers.iter().chain(extra.iter()) {
            content.extend_from_slice(name);
            content.extend_from_slice(b": ");
            content.extend_from_slice(value);
            content.extend_from_slice(b"\r\n");
        }
        content.extend_from_slice(b"\r\n");
        content.extend_from_slice(INVALID_REQUEST_BODY.as_bytes());

        self.transport.write(content.freeze());
        self.transport.close();
    }

    fn connection_lost(&mut self, err: Option<&std::io::Error>) {
        match err {
            Some(err) => tracing::debug!(client = ?self.client, error = %err, "connection lost"),
            None => tracing::debug!(client = ?self.client, "client closed connection"),
        }
        if let Some(cycle) = &self.cycle {
            cycle.disconnect();
        }
        if let Some(active) = &self.active {
            active.disconnect();
        }
        self.pipeline.clear();
        self.keep_alive_deadline = None;
        self.flow.resume_writing();
        self.transport.abort();
    }

    fn shutdown(&mut self) {
        self.shutting_down = true;
        match &self.active {
            Some(active) if !active.is_finished() => {
                tracing::debug!(client = ?self.client, "shutdown requested, finishing active response");
                active.shutdown();
            }
            _ => self.transport.close(),
        }
    }

    fn start_cycle(&mut self, cycle: Arc<RequestResponseCycle>, app: Arc<dyn Application>) {
        self.active = Some(cycle.clone());
        let guard = self.server_state.track_task();
        tokio::spawn(async move {
            let _guard = guard;
            cycle.run(app).await;
        });
    }

    fn on_response_complete(&mut self) {
        self.server_state.record_request();

        // A stale notice from a cycle already replaced by a newer one.
        if self.active.as_ref().is_some_and(|active| !active.is_finished()) {
            return;
        }
        if self.transport.is_closing() {
            return;
        }
        if self.shutting_down {
            self.pipeline.clear();
            self.transport.close();
            return;
        }

        self.keep_alive_deadline = None;
        self.flow.resume_reading();

        match self.pipeline.pop_front() {
            Some((cycle, app)) => self.start_cycle(cycle, app),
            None => {
                self.keep_alive_deadline = Some(Instant::now() + self.config.timeout_keep_alive());
            }
        }
    }
}

impl ParserEvents for Driver {
    fn on_message_begin(&mut self) {
        self.headers.clear();
        self.expect_100_continue = false;
        self.expect_trailers = false;
    }

    fn on_header(&mut self, name: &[u8], value: &[u8]) {
        let name = name.to_ascii_lowercase();
        if name == b"expect" && value.eq_ignore_ascii_case(b"100-continue") {
            self.expect_100_continue = true;
        } else if name == b"te" && headers::contains_token(value, b"trailers") {
            self.expect_trailers = true;
        }
        self.headers.push(header(name, value.to_vec()));
    }

    fn on_headers_complete(&mut self, head: RequestHead) {
        if self.transport.is_closing() {
            return;
        }
        // Only a complete head counts as activity; stray body bytes or a
        // partial head leave the countdown running.
        self.keep_alive_deadline = None;

        let scope = ScopeBuilder::new()
            .method(head.method)
            .target(head.target)
            .version(head.version)
            .root_path(self.config.root_path.clone())
            .client(self.client)
            .server(self.server)
            .headers(std::mem::take(&mut self.headers))
            .build();

        let over_limit = self
            .config
            .limit_concurrency
            .is_some_and(|limit| self.server_state.active_tasks() >= limit);
        let app = if over_limit {
            tracing::warn!("Exceeded concurrency limit.");
            service_unavailable()
        } else {
            self.app.clone()
        };

        let settings = CycleSettings {
            access_log: self.config.access_log,
            default_headers: self.default_headers.clone(),
            expect_100_continue: self.expect_100_continue,
            expect_trailers: self.expect_trailers,
            keep_alive: head.version != HttpVersion::Http10,
        };
        let cycle = Arc::new(RequestResponseCycle::new(
            scope,
            self.transport.clone(),
            self.flow.clone(),
            settings,
            self.notice_tx.clone(),
        ));
        self.cycle = Some(cycle.clone());

        let idle = self.active.as_ref().is_none_or(|active| active.is_finished());
        if idle && self.pipeline.is_empty() {
            self.start_cycle(cycle, app);
        } else {
            self.flow.pause_reading();
            self.pipeline.push_back((cycle, app));
        }
    }

    fn on_body(&mut self, chunk: &[u8]) {
        let Some(cycle) = &self.cycle else {
            return;
        };
        if cycle.push_body(chunk) {
            self.flow.pause_reading();
        }
    }

    fn on_message_complete(&mut self) {
        if let Some(cycle) = &self.cycle {
            cycle.finish_body();
        }
    }
}
