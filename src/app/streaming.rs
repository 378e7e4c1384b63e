//! Streaming responses with optional trailer fields.

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::http::cycle::{RequestReceiver, ResponseSender};
use crate::http::event::{Header, ReceiveEvent, SendEvent};
use crate::http::headers::header;
use crate::http::scope::{Scope, TRAILERS_EXTENSION};
use crate::http::trailers::TrailerStream;

/// A response whose body is produced chunk by chunk, optionally followed by
/// trailer fields.
///
/// While the body is produced, the request side is watched for a client
/// disconnect; whichever finishes first wins and the other is dropped.
pub struct StreamingResponse {
    status: u16,
    headers: Vec<Header>,
    body: BoxStream<'static, Bytes>,
    trailers: Option<TrailerStream>,
}

impl StreamingResponse {
    pub fn new<S, B>(body: S) -> Self
    where
        S: Stream<Item = B> + Send + 'static,
        B: Into<Bytes> + 'static,
    {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.map(Into::into).boxed(),
            trailers: None,
        }
    }

    /// Body from an in-memory list of chunks.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        I::IntoIter: Send + 'static,
        B: Into<Bytes> + 'static,
    {
        Self::new(stream::iter(chunks))
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.headers.push(header(name, value));
        self
    }

    pub fn trailers(mut self, trailers: TrailerStream) -> Self {
        self.trailers = Some(trailers);
        self
    }

    /// Sends the response, stopping early if the client disconnects.
    pub async fn respond(
        self,
        scope: &Scope,
        receive: RequestReceiver,
        send: ResponseSender,
    ) -> anyhow::Result<()> {
        let support_trailers = scope.extensions.contains(TRAILERS_EXTENSION);

        tokio::select! {
            result = self.stream_response(&receive, &send, support_trailers) => result,
            () = listen_for_disconnect(&receive) => {
                tracing::debug!(path = %scope.path, "client disconnected, response abandoned");
                Ok(())
            }
        }
    }

    async fn stream_response(
        mut self,
        receive: &RequestReceiver,
        send: &ResponseSender,
        support_trailers: bool,
    ) -> anyhow::Result<()> {
        let start = SendEvent::Start {
            status: self.status,
            headers: std::mem::take(&mut self.headers),
            trailers: self.trailers.is_some() && support_trailers,
        };
        send.send(start).await?;

        while let Some(chunk) = self.body.next().await {
            send.send(SendEvent::body(chunk, true)).await?;
            // Sends to a vanished client complete immediately; a ready body
            // stream would never yield to the disconnect branch.
            if receive.is_disconnected() {
                return Ok(());
            }
        }
        send.send(SendEvent::body(Bytes::new(), false)).await?;

        if let Some(trailers) = self.trailers.take() {
            if support_trailers {
                trailers.forward(send).await?;
            }
        }
        Ok(())
    }
}

/// Resolves once the client has gone away.
///
/// After the response body completes `receive` also answers `Disconnect`;
/// that case keeps waiting so pending trailers are not cut off.
async fn listen_for_disconnect(receive: &RequestReceiver) {
    loop {
        if let ReceiveEvent::Disconnect = receive.receive().await {
            if receive.is_disconnected() {
                return;
            }
            std::future::pending::<()>().await;
        }
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("trailers", &self.trailers)
            .finish_non_exhaustive()
    }
}
