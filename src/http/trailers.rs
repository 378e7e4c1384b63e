//! Adapts a producer of trailer pairs into `http.response.trailers` events.
//!
//! Producers may be plain iterators or asynchronous streams; either way the
//! response writer pulls one [`SendEvent::Trailers`] per pair (with
//! `more_trailers: true`) followed by a single empty event that ends the
//! trailer section.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::CycleError;
use crate::http::cycle::ResponseSender;
use crate::http::event::{Header, SendEvent};

pub struct TrailerStream {
    pairs: BoxStream<'static, Header>,
    finished: bool,
}

impl TrailerStream {
    /// Wraps a synchronous producer.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        I::IntoIter: Send + 'static,
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into()));
        Self::from_stream(stream::iter(pairs))
    }

    /// Wraps an asynchronous producer.
    pub fn from_stream<S, K, V>(pairs: S) -> Self
    where
        S: Stream<Item = (K, V)> + Send + 'static,
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        Self {
            pairs: pairs.map(|(k, v)| (k.into(), v.into())).boxed(),
            finished: false,
        }
    }

    /// Next trailer event, or `None` after the terminating event was yielded.
    pub async fn next_event(&mut self) -> Option<SendEvent> {
        self.next().await
    }

    /// Sends every trailer event through `send`.
    pub async fn forward(mut self, send: &ResponseSender) -> Result<(), CycleError> {
        while let Some(event) = self.next_event().await {
            send.send(event).await?;
        }
        Ok(())
    }
}

impl Stream for TrailerStream {
    type Item = SendEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SendEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.pairs.poll_next_unpin(cx) {
            Poll::Ready(Some(pair)) => Poll::Ready(Some(SendEvent::trailers(vec![pair], true))),
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(SendEvent::trailers(Vec::new(), false)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for TrailerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrailerStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
