//! Outgoing responses.
//!
//! A [`Response`] is a status, an ordered header list and a [`Body`]. The
//! body stays a stream until something needs its bytes; the interceptor only
//! buffers it for non-200 statuses.

use bytes::Bytes;
use futures_util::Stream;
use http::StatusCode;
use tracing::error;

use crate::body::{Body, BoxError};
use crate::request::header_value;

// ── ContentType ───────────────────────────────────────────────────────────────

/// `content-type` values accepted by [`ResponseBuilder::bytes`] and
/// [`ResponseBuilder::stream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    EventStream,
    Html,
    Json,
    NdJson,
    OctetStream,
    Text,
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::NdJson      => "application/x-ndjson",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use vestibule::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// Anything beyond a 200 with a fixed body goes through the builder:
///
/// ```rust
/// use vestibule::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// let chunks = futures_util::stream::iter(vec![
///     Ok::<_, std::io::Error>(bytes::Bytes::from("{\"n\":1}\n")),
///     Ok(bytes::Bytes::from("{\"n\":2}\n")),
/// ]);
/// Response::builder().stream(ContentType::NdJson, chunks);
/// ```
pub struct Response {
    pub(crate) body: Body,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) status: StatusCode,
}

#[cfg(test)]
impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl Response {
    /// 200, `application/json`. Typically `serde_json::to_vec(&value)?`.
    pub fn json(body: Vec<u8>) -> Self {
        Response::builder().json(body)
    }

    /// 200, `text/plain`.
    pub fn text(body: impl Into<String>) -> Self {
        Response::builder().text(body)
    }

    /// Empty body with the given status.
    pub fn status(code: StatusCode) -> Self {
        Response::builder().status(code).no_body()
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &Body { &self.body }
    pub fn into_body(self) -> Body { self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Appends a header.
    pub fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Sets a header, dropping any existing entries of the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Converts into the `http` type hyper writes to the wire.
    ///
    /// An invalid header name or value turns the whole response into a bare
    /// 500.
    pub(crate) fn into_inner(self) -> http::Response<Body> {
        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(self.body).unwrap_or_else(|e| {
            error!("invalid response header: {e}");
            let mut fallback = http::Response::new(Body::empty());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Builder returned by [`Response::builder`]. Starts at 200; the body
/// method ends the chain and sets `content-type`.
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish(ContentType::Json, body.into())
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        let text: String = body.into();
        self.finish(ContentType::Text, text.into())
    }

    /// Any other fixed payload.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        let bytes: Bytes = body.into();
        self.finish(content_type, bytes.into())
    }

    /// Body produced chunk by chunk, forwarded as the stream yields it.
    pub fn stream<S, E>(self, content_type: ContentType, chunks: S) -> Response
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.finish(content_type, Body::from_stream(chunks))
    }

    pub fn no_body(self) -> Response {
        Response { body: Body::empty(), headers: self.headers, status: self.status }
    }

    fn finish(self, content_type: ContentType, body: Body) -> Response {
        let mut headers = vec![("content-type".to_owned(), content_type.as_str().to_owned())];
        headers.extend(self.headers);
        Response { body, headers, status: self.status }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Values a handler can return directly. Implement it for your own types to
/// skip building a [`Response`] by hand in every handler.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// `(StatusCode::NOT_FOUND, "no such user")`
impl<T: IntoResponse> IntoResponse for (StatusCode, T) {
    fn into_response(self) -> Response {
        let mut response = self.1.into_response();
        response.status = self.0;
        response
    }
}
