use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use serde::Deserialize;

use crate::http::event::Header;
use crate::http::headers;

pub const SERVER_HEADER_VALUE: &str = "h1-trailers";

/// Server settings. Every field has a default, so a YAML file only needs to
/// list what it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Prefix the application is mounted under.
    pub root_path: String,
    pub access_log: bool,
    /// Maximum concurrently running response tasks before answering 503.
    pub limit_concurrency: Option<usize>,
    /// Seconds an idle keep-alive connection stays open.
    pub timeout_keep_alive: u64,
    /// Seconds to wait for open connections on shutdown. `None` waits forever.
    pub timeout_graceful_shutdown: Option<u64>,
    pub server_header: bool,
    /// Extra `"name: value"` headers added to every response.
    pub headers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            root_path: String::new(),
            access_log: true,
            limit_concurrency: None,
            timeout_keep_alive: 5,
            timeout_graceful_shutdown: None,
            server_header: true,
            headers: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults, overlaid by the YAML file named in `H1_CONFIG`, then by
    /// `LISTEN`.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("H1_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_yaml::from_str(text).context("invalid config")?;
        cfg.default_headers()?;
        Ok(cfg)
    }

    pub fn timeout_keep_alive(&self) -> Duration {
        Duration::from_secs(self.timeout_keep_alive)
    }

    pub fn timeout_graceful_shutdown(&self) -> Option<Duration> {
        self.timeout_graceful_shutdown.map(Duration::from_secs)
    }

    /// Headers written at the top of every response.
    pub fn default_headers(&self) -> anyhow::Result<Vec<Header>> {
        let mut encoded = Vec::with_capacity(self.headers.len() + 1);
        if self.server_header {
            encoded.push(headers::header("server", SERVER_HEADER_VALUE));
        }
        for entry in &self.headers {
            let (name, value) = entry
                .split_once(':')
                .with_context(|| format!("header {entry:?} is not in 'name: value' form"))?;
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            headers::validate(name.as_bytes(), value.as_bytes())
                .with_context(|| format!("invalid default header {entry:?}"))?;
            encoded.push((Bytes::from(name), Bytes::copy_from_slice(value.as_bytes())));
        }
        Ok(encoded)
    }
}
