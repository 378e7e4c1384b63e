//! Header syntax checks and small helpers shared by the cycle and driver.

use bytes::Bytes;

use crate::error::CycleError;
use crate::http::event::Header;

/// Builds a header pair from anything convertible to bytes.
///
/// ```
/// # use h1_trailers::http::headers::header;
/// let (name, value) = header("content-type", "text/plain");
/// assert_eq!(&name[..], b"content-type");
/// assert_eq!(&value[..], b"text/plain");
/// ```
pub fn header(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Header {
    (name.into(), value.into())
}

pub fn close_header() -> Header {
    header("connection", "close")
}

/// Control characters and separators are not allowed in header names.
fn is_invalid_name_byte(b: u8) -> bool {
    matches!(
        b,
        0x00..=0x1F
            | 0x7F
            | b'('
            | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'['
            | b']'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\\'
            | b'"'
    )
}

/// Header values may carry horizontal tabs but no other control bytes.
fn is_invalid_value_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0A..=0x1F | 0x7F)
}

pub fn validate(name: &[u8], value: &[u8]) -> Result<(), CycleError> {
    if name.is_empty() || name.iter().copied().any(is_invalid_name_byte) {
        return Err(CycleError::InvalidHeaderName);
    }
    if value.iter().copied().any(is_invalid_value_byte) {
        return Err(CycleError::InvalidHeaderValue);
    }
    Ok(())
}

/// Whether a comma separated header value lists `token` (case-insensitive).
pub fn contains_token(value: &[u8], token: &[u8]) -> bool {
    value
        .split(|&b| b == b',')
        .any(|item| item.trim_ascii().eq_ignore_ascii_case(token))
}

pub fn is_close(name: &[u8], value: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"connection") && value.trim_ascii().eq_ignore_ascii_case(b"close")
}

/// Parses a `content-length` value, tolerating surrounding whitespace.
pub fn parse_content_length(value: &[u8]) -> Result<u64, CycleError> {
    std::str::from_utf8(value.trim_ascii())
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CycleError::InvalidContentLength)
}
