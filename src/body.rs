//! Request and response bodies.
//!
//! A [`Body`] is in one of two shapes:
//!
//! ```text
//! Bytes(..)   owned payload      readable any number of times
//! Stream(..)  chunk stream       single pass, not restartable
//! ```
//!
//! Bodies arrive from hyper as streams. Reading one to the end through
//! [`Body::read_to_end`] swaps the stream for the collected bytes, so every
//! later reader sees exactly the same payload. [`Body::drain_chunks`] does the
//! same for responses but keeps the original chunking, re-emitting the drained
//! chunks as a fresh stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt, stream};
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};

use crate::error::Error;

/// Boxed error carried by body streams and unhandled handler failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An HTTP message body.
pub struct Body(Kind);

enum Kind {
    Bytes(Bytes),
    Stream(UnsyncBoxBody<Bytes, BoxError>),
}

impl Body {
    pub fn empty() -> Self {
        Self(Kind::Bytes(Bytes::new()))
    }

    /// Wraps a stream of chunks. The stream is polled lazily by the transport.
    pub fn from_stream<S, E>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let frames = chunks.map_ok(Frame::data).map_err(Into::<BoxError>::into);
        Self(Kind::Stream(StreamBody::new(frames).boxed_unsync()))
    }

    /// Wraps any `http_body::Body`, e.g. hyper's `Incoming`.
    pub fn from_http<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(Kind::Stream(body.map_err(Into::<BoxError>::into).boxed_unsync()))
    }

    /// `true` once the payload is held in memory.
    pub fn is_buffered(&self) -> bool {
        matches!(self.0, Kind::Bytes(_))
    }

    /// Consumes the body and returns the full payload.
    pub async fn to_bytes(mut self) -> Result<Bytes, Error> {
        self.read_to_end().await
    }

    /// Reads the full payload and leaves `self` holding a replay of it.
    ///
    /// Idempotent: once buffered, every call returns the same bytes without
    /// touching the transport again. On a transport failure the body is left
    /// empty and the error is returned; nothing is retried.
    pub(crate) async fn read_to_end(&mut self) -> Result<Bytes, Error> {
        let stream = match std::mem::replace(&mut self.0, Kind::Bytes(Bytes::new())) {
            Kind::Bytes(bytes) => {
                self.0 = Kind::Bytes(bytes.clone());
                return Ok(bytes);
            }
            Kind::Stream(stream) => stream,
        };

        let bytes = stream.collect().await.map_err(Error::Body)?.to_bytes();
        self.0 = Kind::Bytes(bytes.clone());
        Ok(bytes)
    }

    /// Drains every data chunk and leaves `self` as a stream replaying them
    /// in the original order. Trailers are dropped.
    pub(crate) async fn drain_chunks(&mut self) -> Result<Vec<Bytes>, Error> {
        let mut stream = match std::mem::replace(&mut self.0, Kind::Bytes(Bytes::new())) {
            Kind::Bytes(bytes) => {
                self.0 = Kind::Bytes(bytes.clone());
                return Ok(if bytes.is_empty() { Vec::new() } else { vec![bytes] });
            }
            Kind::Stream(stream) => stream,
        };

        let mut chunks = Vec::new();
        while let Some(frame) = stream.frame().await {
            if let Ok(data) = frame.map_err(Error::Body)?.into_data() {
                chunks.push(data);
            }
        }

        self.0 = Kind::Stream(replay(chunks.clone()));
        Ok(chunks)
    }
}

fn replay(chunks: Vec<Bytes>) -> UnsyncBoxBody<Bytes, BoxError> {
    let frames = stream::iter(chunks.into_iter().map(|chunk| Ok::<_, BoxError>(Frame::data(chunk))));
    StreamBody::new(frames).boxed_unsync()
}

impl Default for Body {
    fn default() -> Self { Self::empty() }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self { Self(Kind::Bytes(bytes)) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Self(Kind::Bytes(bytes.into())) }
}

impl From<String> for Body {
    fn from(text: String) -> Self { Self(Kind::Bytes(text.into())) }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self { Self(Kind::Bytes(Bytes::from_static(text.as_bytes()))) }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        match &mut self.get_mut().0 {
            Kind::Bytes(bytes) if bytes.is_empty() => Poll::Ready(None),
            Kind::Bytes(bytes) => Poll::Ready(Some(Ok(Frame::data(std::mem::take(bytes))))),
            Kind::Stream(stream) => Pin::new(stream).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.0 {
            Kind::Bytes(bytes) => bytes.is_empty(),
            Kind::Stream(stream) => stream.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.0 {
            Kind::Bytes(bytes) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(stream) => stream.size_hint(),
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Kind::Bytes(bytes) => f.debug_tuple("Body::Bytes").field(&bytes.len()).finish(),
            Kind::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}
