//! Byte-level request parsing, kept behind a narrow callback interface.
//!
//! The connection driver implements [`ParserEvents`] and feeds raw bytes to
//! any [`Parser`]. [`HttpParser`] is the default, incremental implementation
//! on top of `httparse`.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use crate::http::headers;
use crate::http::scope::{HttpVersion, Method};

pub const MAX_HEADERS: usize = 100;
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed request head: {0}")]
    Head(#[from] httparse::Error),
    #[error("incomplete request line")]
    RequestLine,
    #[error("unsupported HTTP version")]
    Version,
    #[error("invalid Content-Length header")]
    InvalidContentLength,
    #[error("invalid chunk size")]
    InvalidChunkSize,
    #[error("invalid chunk terminator")]
    InvalidChunkTerminator,
    #[error("request head larger than {0} bytes")]
    HeadTooLarge(usize),
}

/// Decoded request line plus the framing facts the driver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Request target exactly as sent.
    pub target: Bytes,
    pub version: HttpVersion,
    pub upgrade: bool,
}

/// Callbacks fired by a [`Parser`], in wire order.
pub trait ParserEvents {
    fn on_message_begin(&mut self);
    fn on_header(&mut self, name: &[u8], value: &[u8]);
    fn on_headers_complete(&mut self, head: RequestHead);
    fn on_body(&mut self, chunk: &[u8]);
    fn on_message_complete(&mut self);
}

pub trait Parser: Send {
    /// Consumes `data`, firing events for every complete element. Parse
    /// errors are fatal for the connection.
    fn feed(&mut self, data: &[u8], events: &mut dyn ParserEvents) -> Result<(), ParseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    /// Fixed-length body, bytes left
    Length(u64),
    ChunkSize,
    /// Bytes left in the current chunk
    ChunkData(u64),
    ChunkEnd,
    /// Request trailer lines after the last chunk; consumed and ignored
    Trailers,
}

#[derive(Debug)]
pub struct HttpParser {
    buffer: BytesMut,
    state: State,
    max_head_size: usize,
}

impl HttpParser {
    pub fn new() -> Self {
        Self::with_max_head_size(MAX_HEAD_SIZE)
    }

    pub fn with_max_head_size(max_head_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            state: State::Head,
            max_head_size,
        }
    }

    fn finish_message(&mut self, events: &mut dyn ParserEvents) {
        events.on_message_complete();
        self.state = State::Head;
    }

    /// Returns true when progress was made and parsing should continue.
    fn step(&mut self, events: &mut dyn ParserEvents) -> Result<bool, ParseError> {
        match self.state {
            State::Head => self.parse_head(events),
            State::Length(remaining) => {
                if self.buffer.is_empty() {
                    return Ok(false);
                }
                let remaining = self.take_body(remaining, events);
                if remaining == 0 {
                    self.finish_message(events);
                } else {
                    self.state = State::Length(remaining);
                }
                Ok(true)
            }
            State::ChunkSize => match httparse::parse_chunk_size(&self.buffer) {
                Ok(httparse::Status::Complete((consumed, size))) => {
                    self.buffer.advance(consumed);
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::ChunkData(size)
                    };
                    Ok(true)
                }
                Ok(httparse::Status::Partial) => Ok(false),
                Err(_) => Err(ParseError::InvalidChunkSize),
            },
            State::ChunkData(remaining) => {
                if self.buffer.is_empty() {
                    return Ok(false);
                }
                let remaining = self.take_body(remaining, events);
                self.state = if remaining == 0 {
                    State::ChunkEnd
                } else {
                    State::ChunkData(remaining)
                };
                Ok(true)
            }
            State::ChunkEnd => {
                if self.buffer.len() < 2 {
                    return Ok(false);
                }
                if &self.buffer[..2] != b"\r\n" {
                    return Err(ParseError::InvalidChunkTerminator);
                }
                self.buffer.advance(2);
                self.state = State::ChunkSize;
                Ok(true)
            }
            State::Trailers => match self.buffer.windows(2).position(|w| w == b"\r\n") {
                None if self.buffer.len() > self.max_head_size => {
                    Err(ParseError::HeadTooLarge(self.max_head_size))
                }
                None => Ok(false),
                Some(0) => {
                    self.buffer.advance(2);
                    self.finish_message(events);
                    Ok(true)
                }
                Some(pos) => {
                    self.buffer.advance(pos + 2);
                    Ok(true)
                }
            },
        }
    }

    fn take_body(&mut self, remaining: u64, events: &mut dyn ParserEvents) -> u64 {
        let n = remaining.min(self.buffer.len() as u64) as usize;
        let chunk = self.buffer.split_to(n);
        events.on_body(&chunk);
        remaining - n as u64
    }

    fn parse_head(&mut self, events: &mut dyn ParserEvents) -> Result<bool, ParseError> {
        if self.buffer.is_empty() {
            return Ok(false);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        let consumed = match request.parse(&self.buffer)? {
            httparse::Status::Complete(consumed) => consumed,
            httparse::Status::Partial => {
                if self.buffer.len() > self.max_head_size {
                    return Err(ParseError::HeadTooLarge(self.max_head_size));
                }
                return Ok(false);
            }
        };

        let (Some(method), Some(path), Some(version)) =
            (request.method, request.path, request.version)
        else {
            return Err(ParseError::RequestLine);
        };
        let version = match version {
            0 => HttpVersion::Http10,
            1 => HttpVersion::Http11,
            _ => return Err(ParseError::Version),
        };

        events.on_message_begin();

        let mut content_length: Option<u64> = None;
        let mut chunked = false;
        let mut upgrade = false;
        for h in request.headers.iter() {
            events.on_header(h.name.as_bytes(), h.value);
            if h.name.eq_ignore_ascii_case("content-length") {
                let length = headers::parse_content_length(h.value)
                    .map_err(|_| ParseError::InvalidContentLength)?;
                if content_length.is_some_and(|previous| previous != length) {
                    return Err(ParseError::InvalidContentLength);
                }
                content_length = Some(length);
            } else if h.name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = headers::contains_token(h.value, b"chunked");
            } else if h.name.eq_ignore_ascii_case("upgrade") {
                upgrade = true;
            }
        }

        let head = RequestHead {
            method: Method::parse(method),
            target: Bytes::copy_from_slice(path.as_bytes()),
            version,
            upgrade,
        };
        self.buffer.advance(consumed);
        events.on_headers_complete(head);

        if chunked {
            self.state = State::ChunkSize;
        } else {
            match content_length.unwrap_or(0) {
                0 => self.finish_message(events),
                length => self.state = State::Length(length),
            }
        }
        Ok(true)
    }
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for HttpParser {
    fn feed(&mut self, data: &[u8], events: &mut dyn ParserEvents) -> Result<(), ParseError> {
        self.buffer.extend_from_slice(data);
        while self.step(events)? {}
        Ok(())
    }
}

