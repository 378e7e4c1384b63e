#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use h1_trailers::app::Application;
use h1_trailers::config::Config;
use h1_trailers::http::connection::{Connection, ConnectionContext};
use h1_trailers::http::cycle::RequestReceiver;
use h1_trailers::http::event::ReceiveEvent;
use h1_trailers::http::parser::Parser;
use h1_trailers::server::state::ServerState;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Config with no implicit headers and access logging off, so expected
/// responses can be written out byte for byte.
pub fn quiet_config() -> Config {
    Config {
        access_log: false,
        server_header: false,
        ..Config::default()
    }
}

/// One server's worth of shared state; hands out in-memory connections.
pub struct Harness {
    pub state: Arc<ServerState>,
    config: Arc<Config>,
    app: Arc<dyn Application>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    pub fn new(config: Config, app: impl Application) -> Self {
        let state = Arc::new(ServerState::new(config.default_headers().unwrap()));
        let (shutdown, _) = watch::channel(false);
        Self {
            state,
            config: Arc::new(config),
            app: Arc::new(app),
            shutdown,
        }
    }

    pub fn connect(&self) -> TestClient {
        let (client, conn) = self.open();
        spawn_client(client, conn)
    }

    /// Like [`Harness::connect`], but requests are decoded by `parser`.
    pub fn connect_with_parser(&self, parser: impl Parser + 'static) -> TestClient {
        let (client, conn) = self.open();
        spawn_client(client, conn.with_parser(parser))
    }

    fn open(&self) -> (DuplexStream, Connection<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let ctx = ConnectionContext {
            config: self.config.clone(),
            state: self.state.clone(),
            app: self.app.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        let conn = Connection::new(server, ctx, Some(client_addr()), Some(server_addr()));
        (client, conn)
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

fn spawn_client(stream: DuplexStream, conn: Connection<DuplexStream>) -> TestClient {
    TestClient {
        stream,
        received: Vec::new(),
        task: tokio::spawn(conn.run()),
    }
}

pub fn client_addr() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

pub fn server_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

pub struct TestClient {
    stream: DuplexStream,
    received: Vec<u8>,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl TestClient {
    pub async fn send(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.unwrap();
    }

    /// Half-closes the client side; the server sees end of stream.
    pub async fn hang_up(&mut self) {
        self.stream.shutdown().await.unwrap();
    }

    /// Reads until `needle` has arrived and returns everything up to and
    /// including it.
    pub async fn read_until(&mut self, needle: &str) -> String {
        let needle = needle.as_bytes();
        tokio::time::timeout(IO_TIMEOUT, async {
            loop {
                if let Some(pos) = find(&self.received, needle) {
                    let taken: Vec<u8> = self.received.drain(..pos + needle.len()).collect();
                    return String::from_utf8_lossy(&taken).into_owned();
                }
                let mut chunk = [0u8; 4096];
                let n = self.stream.read(&mut chunk).await.unwrap();
                assert!(
                    n > 0,
                    "connection closed while waiting for {:?}, got {:?}",
                    String::from_utf8_lossy(needle),
                    String::from_utf8_lossy(&self.received)
                );
                self.received.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .expect("timed out waiting for response bytes")
    }

    /// Reads everything until the server closes the connection.
    pub async fn read_to_close(&mut self) -> String {
        tokio::time::timeout(IO_TIMEOUT, async {
            let mut rest = Vec::new();
            self.stream.read_to_end(&mut rest).await.unwrap();
            self.received.extend_from_slice(&rest);
        })
        .await
        .expect("timed out waiting for close");
        let taken = std::mem::take(&mut self.received);
        String::from_utf8_lossy(&taken).into_owned()
    }

    /// True when nothing arrives within `wait`.
    pub async fn is_quiet_for(&mut self, wait: Duration) -> bool {
        if !self.received.is_empty() {
            return false;
        }
        let mut chunk = [0u8; 1024];
        match tokio::time::timeout(wait, self.stream.read(&mut chunk)).await {
            Err(_) => true,
            Ok(Ok(n)) => {
                self.received.extend_from_slice(&chunk[..n]);
                false
            }
            Ok(Err(_)) => false,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Collects the whole request body, or `None` if the client went away.
pub async fn read_body(receive: &RequestReceiver) -> Option<Bytes> {
    let mut body = BytesMut::new();
    loop {
        match receive.receive().await {
            ReceiveEvent::Request { body: chunk, more_body } => {
                body.extend_from_slice(&chunk);
                if !more_body {
                    return Some(body.freeze());
                }
            }
            ReceiveEvent::Disconnect => return None,
        }
    }
}
