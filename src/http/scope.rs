use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use percent_encoding::percent_decode;

use crate::http::event::Header;
use crate::http::headers;

/// Extension key advertising that the server accepts `http.response.trailers`.
pub const TRAILERS_EXTENSION: &str = "http.response.trailers";

/// HTTP request methods.
///
/// The common verbs get their own variant; anything else the parser accepted
/// is kept verbatim in `Extension`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other token, e.g. `PROPFIND`
    Extension(String),
}

impl Method {
    /// Parses an HTTP method token. Method names are case-sensitive.
    ///
    /// # Example
    ///
    /// ```
    /// # use h1_trailers::http::scope::Method;
    /// assert_eq!(Method::parse("GET"), Method::GET);
    /// assert_eq!(Method::parse("get"), Method::Extension("get".into()));
    /// ```
    pub fn parse(s: &str) -> Self {
        match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            other => Method::Extension(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Extension(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    /// Version string without the `HTTP/` prefix, as exposed in the scope.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
        }
    }
}

/// Optional capabilities the server advertises to the handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions(BTreeSet<String>);

impl Extensions {
    pub fn with_trailers() -> Self {
        let mut ext = Self::default();
        ext.insert(TRAILERS_EXTENSION);
        ext
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

/// Immutable description of one request, handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Always `"http"`.
    pub kind: &'static str,
    pub spec_version: &'static str,
    pub http_version: HttpVersion,
    pub method: Method,
    pub scheme: String,
    /// Percent-decoded path.
    pub path: String,
    /// Path exactly as it appeared on the request line.
    pub raw_path: Bytes,
    pub query_string: Bytes,
    pub root_path: String,
    pub client: Option<SocketAddr>,
    pub server: Option<SocketAddr>,
    /// Request headers in arrival order, names lower-cased.
    pub headers: Vec<Header>,
    pub extensions: Extensions,
}

impl Scope {
    /// First header with the given (lower-case) name.
    pub fn header(&self, name: &[u8]) -> Option<&Bytes> {
        self.headers
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v)
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    pub fn has_close_header(&self) -> bool {
        self.headers.iter().any(|(n, v)| headers::is_close(n, v))
    }

    pub fn path_with_query_string(&self) -> String {
        let path = format!("{}{}", self.root_path, self.path);
        if self.query_string.is_empty() {
            path
        } else {
            format!("{}?{}", path, String::from_utf8_lossy(&self.query_string))
        }
    }

    /// `ip:port` of the peer, or an empty string when unknown.
    pub fn client_addr(&self) -> String {
        self.client.map(|addr| addr.to_string()).unwrap_or_default()
    }
}

/// Builder for constructing Scope values.
#[derive(Debug, Default)]
pub struct ScopeBuilder {
    method: Option<Method>,
    target: Bytes,
    version: Option<HttpVersion>,
    scheme: Option<String>,
    root_path: String,
    client: Option<SocketAddr>,
    server: Option<SocketAddr>,
    headers: Vec<Header>,
    extensions: Extensions,
}

impl ScopeBuilder {
    pub fn new() -> Self {
        Self {
            extensions: Extensions::with_trailers(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Raw request target from the request line (`/path?query` or absolute form).
    pub fn target(mut self, target: impl Into<Bytes>) -> Self {
        self.target = target.into();
        self
    }

    pub fn version(mut self, version: HttpVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    pub fn client(mut self, addr: Option<SocketAddr>) -> Self {
        self.client = addr;
        self
    }

    pub fn server(mut self, addr: Option<SocketAddr>) -> Self {
        self.server = addr;
        self
    }

    /// Appends a header, lower-casing its name.
    pub fn header(mut self, name: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Self {
        let name = Bytes::from(name.as_ref().to_ascii_lowercase());
        self.headers.push((name, value.into()));
        self
    }

    pub fn headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }

    pub fn build(self) -> Scope {
        let (raw_path, query_string) = split_target(&self.target);
        let path = percent_decode(&raw_path).decode_utf8_lossy().into_owned();

        Scope {
            kind: "http",
            spec_version: "2.3",
            http_version: self.version.unwrap_or(HttpVersion::Http11),
            method: self.method.unwrap_or(Method::GET),
            scheme: self.scheme.unwrap_or_else(|| "http".to_string()),
            path,
            raw_path,
            query_string,
            root_path: self.root_path,
            client: self.client,
            server: self.server,
            headers: self.headers,
            extensions: self.extensions,
        }
    }
}

/// Splits a request target into raw path and query string.
fn split_target(target: &Bytes) -> (Bytes, Bytes) {
    if !target.starts_with(b"/") {
        // absolute-form: http://host/path?query
        if let Some(url) = std::str::from_utf8(target)
            .ok()
            .and_then(|s| url::Url::parse(s).ok())
        {
            let path = Bytes::copy_from_slice(url.path().as_bytes());
            let query = url
                .query()
                .map(|q| Bytes::copy_from_slice(q.as_bytes()))
                .unwrap_or_default();
            return (path, query);
        }
    }
    match target.iter().position(|&b| b == b'?') {
        Some(pos) => (target.slice(..pos), target.slice(pos + 1..)),
        None => (target.clone(), Bytes::new()),
    }
}
