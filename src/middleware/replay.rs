//! Reading a body without taking it away from its next reader.
//!
//! Request and response bodies arrive as single-pass streams. Middleware that
//! wants to log a body must read it, and the handler (or the client) must
//! still get every byte afterwards. Both helpers here drain the stream once
//! and put an in-memory replay back in its place.

use bytes::{Bytes, BytesMut};

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Reads the whole request body and arranges for every later read to yield
/// the same bytes.
///
/// Must run before the request is handed down the chain. The handler then
/// reads the replay through [`Request::bytes`], [`Request::text`] or
/// [`Request::json`] as usual, any number of times. A transport failure is
/// returned as [`Error::Body`]; it is not retried.
pub async fn capture_request_body(req: &mut Request) -> Result<Bytes, Error> {
    req.body.read_to_end().await
}

/// Drains the response body and returns it concatenated, leaving the
/// response with a stream that re-emits the same chunks in the same order.
///
/// The bytes the client receives are exactly the bytes the handler produced.
/// Costs a full buffer of the body, so callers only do this when they need
/// the text (the interceptor: non-200 responses).
pub async fn buffer_response_body(response: &mut Response) -> Result<Bytes, Error> {
    let chunks = response.body.drain_chunks().await?;
    let mut joined = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in &chunks {
        joined.extend_from_slice(chunk);
    }
    Ok(joined.freeze())
}
