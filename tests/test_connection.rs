mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use h1_trailers::app::Response;
use h1_trailers::config::Config;
use h1_trailers::http::cycle::{RequestReceiver, ResponseSender};
use h1_trailers::http::event::SendEvent;
use h1_trailers::http::parser::{ParseError, Parser, ParserEvents, RequestHead};
use h1_trailers::http::scope::{HttpVersion, Method, Scope};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use common::{Harness, quiet_config};

async fn no_content(_scope: Scope, _receive: RequestReceiver, send: ResponseSender) -> anyhow::Result<()> {
    send.send(SendEvent::start(204, vec![])).await?;
    send.send(SendEvent::body("", false)).await?;
    Ok(())
}

async fn describe(scope: Scope, _receive: RequestReceiver, send: ResponseSender) -> anyhow::Result<()> {
    let text = format!(
        "{} {}{} {}",
        scope.method,
        scope.root_path,
        scope.path,
        String::from_utf8_lossy(&scope.query_string)
    );
    Response::ok(text).send(&send).await
}

/// Handler that reports when it starts and then waits to be released.
#[derive(Clone)]
struct Gated {
    calls: Arc<AtomicUsize>,
    entered: mpsc::UnboundedSender<String>,
    release: Arc<Mutex<mpsc::UnboundedReceiver<()>>>,
}

struct Gate {
    calls: Arc<AtomicUsize>,
    entered: mpsc::UnboundedReceiver<String>,
    release: mpsc::UnboundedSender<()>,
}

fn gated() -> (Gated, Gate) {
    let calls = Arc::new(AtomicUsize::new(0));
    let (entered_tx, entered_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = mpsc::unbounded_channel();
    let app = Gated {
        calls: calls.clone(),
        entered: entered_tx,
        release: Arc::new(Mutex::new(release_rx)),
    };
    let gate = Gate {
        calls,
        entered: entered_rx,
        release: release_tx,
    };
    (app, gate)
}

impl h1_trailers::app::Application for Gated {
    fn call(
        &self,
        scope: Scope,
        _receive: RequestReceiver,
        send: ResponseSender,
    ) -> h1_trailers::app::HandlerFuture {
        let this = self.clone();
        Box::pin(async move {
            this.calls.fetch_add(1, Ordering::SeqCst);
            let _ = this.entered.send(scope.path.clone());
            this.release.lock().await.recv().await;
            Response::ok(scope.path).send(&send).await
        })
    }
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let app = {
        let running = running.clone();
        let peak = peak.clone();
        move |scope: Scope, _receive: RequestReceiver, send: ResponseSender| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if scope.path == "/1" {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                let result = Response::ok(scope.path).send(&send).await;
                running.fetch_sub(1, Ordering::SeqCst);
                result
            }
        }
    };
    let harness = Harness::new(quiet_config(), app);
    let mut client = harness.connect();

    client
        .send(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\nGET /3 HTTP/1.1\r\n\r\n")
        .await;
    let all = client.read_until("\r\n\r\n/3").await;

    let one = all.find("\r\n\r\n/1").unwrap();
    let two = all.find("\r\n\r\n/2").unwrap();
    let three = all.find("\r\n\r\n/3").unwrap();
    assert!(one < two && two < three, "responses out of order: {all:?}");
    assert_eq!(all.matches("HTTP/1.1 200 OK").count(), 3);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrency_limit_substitutes_503() {
    let (app, mut gate) = gated();
    let config = Config {
        limit_concurrency: Some(1),
        ..quiet_config()
    };
    let harness = Harness::new(config, app);
    let mut busy = harness.connect();
    let mut rejected = harness.connect();

    busy.send(b"GET /busy HTTP/1.1\r\n\r\n").await;
    assert_eq!(gate.entered.recv().await.as_deref(), Some("/busy"));

    rejected.send(b"GET /other HTTP/1.1\r\n\r\n").await;
    let response = rejected.read_to_close().await;
    assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
    assert!(response.contains("connection: close\r\n"));
    assert!(response.ends_with("\r\n\r\nService Unavailable"));
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);

    gate.release.send(()).unwrap();
    let ok = busy.read_until("\r\n\r\n/busy").await;
    assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[tokio::test(start_paused = true)]
async fn test_idle_keep_alive_connection_times_out() {
    let harness = Harness::new(quiet_config(), no_content);
    let mut client = harness.connect();

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(
        client.read_until("\r\n\r\n").await,
        "HTTP/1.1 204 No Content\r\n\r\n"
    );
    let idle_since = Instant::now();

    assert!(client.is_quiet_for(Duration::from_secs(4)).await);
    assert_eq!(client.read_to_close().await, "");
    assert!(idle_since.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_new_request_resets_keep_alive_timer() {
    let harness = Harness::new(quiet_config(), no_content);
    let mut client = harness.connect();

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    client.read_until("\r\n\r\n").await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    client.read_until("\r\n\r\n").await;
    let idle_since = Instant::now();

    // Past the first request's deadline, still open.
    assert!(client.is_quiet_for(Duration::from_secs(3)).await);
    assert_eq!(client.read_to_close().await, "");
    assert!(idle_since.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_late_request_body_keeps_keep_alive_timer() {
    let harness = Harness::new(quiet_config(), no_content);
    let mut client = harness.connect();

    client
        .send(b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\n")
        .await;
    client.read_until("\r\n\r\n").await;
    let idle_since = Instant::now();

    tokio::time::sleep(Duration::from_secs(1)).await;
    client.send(b"hello").await;

    assert_eq!(client.read_to_close().await, "");
    let idle = idle_since.elapsed();
    assert!(idle >= Duration::from_secs(5) && idle < Duration::from_secs(6), "closed after {idle:?}");
}

#[tokio::test(start_paused = true)]
async fn test_partial_request_head_does_not_keep_connection_open() {
    let harness = Harness::new(quiet_config(), no_content);
    let mut client = harness.connect();

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    client.read_until("\r\n\r\n").await;
    let idle_since = Instant::now();

    tokio::time::sleep(Duration::from_secs(2)).await;
    client.send(b"GET /slow HTTP/1.1\r\nHost: ").await;

    assert_eq!(client.read_to_close().await, "");
    let idle = idle_since.elapsed();
    assert!(idle >= Duration::from_secs(5) && idle < Duration::from_secs(6), "closed after {idle:?}");
}

#[tokio::test]
async fn test_shutdown_closes_idle_connection() {
    let harness = Harness::new(quiet_config(), no_content);
    let mut client = harness.connect();

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    client.read_until("\r\n\r\n").await;

    harness.shutdown();
    assert_eq!(client.read_to_close().await, "");
    client.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_lets_active_response_finish() {
    let (app, mut gate) = gated();
    let harness = Harness::new(quiet_config(), app);
    let mut client = harness.connect();

    client.send(b"GET /active HTTP/1.1\r\n\r\n").await;
    gate.entered.recv().await;

    harness.shutdown();
    assert!(client.is_quiet_for(Duration::from_millis(20)).await);

    gate.release.send(()).unwrap();
    let response = client.read_to_close().await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("\r\n\r\n/active"));
}

#[tokio::test]
async fn test_shutdown_refuses_queued_requests() {
    let (app, mut gate) = gated();
    let harness = Harness::new(quiet_config(), app);
    let mut client = harness.connect();

    client
        .send(b"GET /first HTTP/1.1\r\n\r\nGET /second HTTP/1.1\r\n\r\n")
        .await;
    gate.entered.recv().await;

    harness.shutdown();
    assert!(client.is_quiet_for(Duration::from_millis(20)).await);

    gate.release.send(()).unwrap();
    gate.release.send(()).unwrap();
    let response = client.read_to_close().await;
    assert_eq!(response.matches("HTTP/1.1").count(), 1);
    assert!(response.ends_with("/first"));
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let harness = Harness::new(quiet_config(), no_content);
    let mut client = harness.connect();

    client
        .send(b"GET / HTTP/1.1\r\nbad header\r\n\r\n")
        .await;
    let response = client.read_to_close().await;

    assert_eq!(
        response,
        "HTTP/1.1 400 Bad Request\r\n\
         content-type: text/plain; charset=utf-8\r\n\
         content-length: 30\r\n\
         connection: close\r\n\
         \r\n\
         Invalid HTTP request received."
    );
}

#[tokio::test]
async fn test_default_headers_lead_every_response() {
    let config = Config {
        access_log: false,
        headers: vec!["X-Powered-By: test-suite".to_string()],
        ..Config::default()
    };
    let harness = Harness::new(config, no_content);
    let mut client = harness.connect();

    client.send(b"GET / HTTP/1.1\r\n\r\n").await;
    let response = client.read_until("\r\n\r\n").await;

    assert_eq!(
        response,
        "HTTP/1.1 204 No Content\r\n\
         server: h1-trailers\r\n\
         x-powered-by: test-suite\r\n\
         \r\n"
    );
}

#[tokio::test]
async fn test_scope_reflects_request_line() {
    let config = Config {
        root_path: "/api".to_string(),
        ..quiet_config()
    };
    let harness = Harness::new(config, describe);
    let mut client = harness.connect();

    client
        .send(b"PUT /items/a%20b?x=1&y=2 HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;
    let response = client.read_until("x=1&y=2").await;

    assert!(response.ends_with("\r\n\r\nPUT /api/items/a b x=1&y=2"));
}

#[tokio::test]
async fn test_client_hang_up_ends_connection() {
    let harness = Harness::new(quiet_config(), no_content);
    let mut client = harness.connect();

    client.hang_up().await;
    client.task.await.unwrap().unwrap();
    assert_eq!(harness.state.connections(), 0);
}

/// Reads one request per line, `METHOD /path`, with no headers or body.
#[derive(Default)]
struct LineParser {
    buffer: Vec<u8>,
}

impl Parser for LineParser {
    fn feed(&mut self, data: &[u8], events: &mut dyn ParserEvents) -> Result<(), ParseError> {
        self.buffer.extend_from_slice(data);
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let Some((method, target)) = line.trim_end().split_once(' ') else {
                return Err(ParseError::RequestLine);
            };
            events.on_message_begin();
            events.on_headers_complete(RequestHead {
                method: Method::parse(method),
                target: target.to_string().into(),
                version: HttpVersion::Http11,
                upgrade: false,
            });
            events.on_message_complete();
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_connection_with_custom_parser() {
    let harness = Harness::new(quiet_config(), describe);
    let mut client = harness.connect_with_parser(LineParser::default());

    client.send(b"GET /one?a=1\nDELETE /two\n").await;
    let first = client.read_until("\r\n\r\nGET /one a=1").await;
    let second = client.read_until("\r\n\r\nDELETE /two ").await;

    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));

    client.send(b"nonsense\n").await;
    let rejected = client.read_to_close().await;
    assert!(rejected.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}
