//! Errors surfaced to application handlers by the response cycle.

use thiserror::Error;

/// Failure of a single `send` call on a response cycle.
///
/// Every variant is fatal to the cycle: the connection is marked
/// non-keep-alive and closed once the cycle finishes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("expected 'http.response.start' event, but got '{0}'")]
    ExpectedStart(&'static str),

    #[error("expected 'http.response.body' event, but got '{0}'")]
    ExpectedBody(&'static str),

    #[error("expected 'http.response.trailers' event, but got '{0}'")]
    ExpectedTrailers(&'static str),

    #[error("unexpected '{0}' event sent after response already completed")]
    AlreadyCompleted(&'static str),

    #[error("invalid HTTP status code {0}")]
    InvalidStatus(u16),

    #[error("invalid HTTP header name")]
    InvalidHeaderName,

    #[error("invalid HTTP header value")]
    InvalidHeaderValue,

    #[error("invalid Content-Length header value")]
    InvalidContentLength,

    #[error("response content longer than Content-Length")]
    ContentTooLong,

    #[error("response content shorter than Content-Length")]
    ContentTooShort,
}

impl CycleError {
    /// True for errors about bytes on the wire rather than event ordering.
    pub fn is_framing(&self) -> bool {
        !matches!(
            self,
            CycleError::ExpectedStart(_)
                | CycleError::ExpectedBody(_)
                | CycleError::ExpectedTrailers(_)
                | CycleError::AlreadyCompleted(_)
        )
    }
}
