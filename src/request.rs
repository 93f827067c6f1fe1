//! Incoming HTTP request type.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{Method, Uri};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

use crate::body::{Body, BoxError};
use crate::error::Error;
use crate::exception::{HandlerError, ValidationError};

/// An incoming HTTP request.
///
/// The body can be read any number of times: the first read pulls it off the
/// wire, every later read (by middleware or by the handler, in any order)
/// replays the same bytes.
pub struct Request {
    pub(crate) head: RequestHead,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Body,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    /// Builds a request from an `http::Request` and the addresses of the two
    /// connection ends, when known.
    pub fn from_http<B>(
        req: http::Request<B>,
        client: Option<SocketAddr>,
        server: Option<SocketAddr>,
    ) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let headers: Vec<(String, String)> = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let components = UrlComponents::new(&parts.uri, &headers, server);

        Self {
            head: RequestHead { method: parts.method, uri: parts.uri, components, client, server },
            headers,
            body: Body::from_http(body),
            params: HashMap::new(),
        }
    }

    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.uri.path() }
    pub fn query(&self) -> Option<&str> { self.head.uri.query() }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn head(&self) -> &RequestHead { &self.head }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The full request body. Safe to call repeatedly.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        self.body.read_to_end().await
    }

    /// The body as UTF-8 text. Invalid UTF-8 is a validation failure.
    pub async fn text(&mut self) -> Result<String, HandlerError> {
        let bytes = self.bytes().await?;
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| ValidationError::new(format!("request body is not valid UTF-8: {e}")))?;
        Ok(text)
    }

    /// Deserializes the JSON body into `T`.
    ///
    /// A body that does not match `T` is a [`ValidationError`], answered with
    /// a 422 before the rest of the handler runs. A transport failure while
    /// reading is an unhandled failure.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, HandlerError> {
        let bytes = self.bytes().await?;
        let value = serde_json::from_slice(&bytes).map_err(ValidationError::from)?;
        Ok(value)
    }
}

impl<B> From<http::Request<B>> for Request
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    fn from(req: http::Request<B>) -> Self {
        Self::from_http(req, None, None)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .field("body", &self.body)
            .finish()
    }
}

pub(crate) fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ── RequestHead ───────────────────────────────────────────────────────────────

/// Everything about a request except its body, cheap to clone.
///
/// Middleware snapshots this before handing the request down the chain, so it
/// can still describe the request if the chain fails.
#[derive(Clone, Debug)]
pub struct RequestHead {
    method: Method,
    uri: Uri,
    components: UrlComponents,
    client: Option<SocketAddr>,
    server: Option<SocketAddr>,
}

impl RequestHead {
    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn components(&self) -> &UrlComponents { &self.components }

    /// Peer IP, or `"n/a"` when the transport did not report one.
    pub fn client_host(&self) -> String {
        self.client.map_or_else(|| "n/a".to_owned(), |addr| addr.ip().to_string())
    }

    /// Local IP the request arrived on, or `"n/a"`.
    pub fn server_host(&self) -> String {
        self.server.map_or_else(|| "n/a".to_owned(), |addr| addr.ip().to_string())
    }

    /// `scheme://netloc/`
    pub fn base_url(&self) -> String {
        format!("{}://{}/", self.components.scheme, self.components.netloc)
    }
}

// ── UrlComponents ─────────────────────────────────────────────────────────────

/// The request URL split into its parts.
///
/// Behind a reverse proxy the scheme comes from `x-forwarded-proto` and the
/// network location from `host`; the fragment is never sent over HTTP and is
/// always empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlComponents {
    pub scheme: String,
    pub netloc: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl UrlComponents {
    fn new(uri: &Uri, headers: &[(String, String)], server: Option<SocketAddr>) -> Self {
        let scheme = header_value(headers, "x-forwarded-proto")
            .map(str::to_owned)
            .or_else(|| uri.scheme_str().map(str::to_owned))
            .unwrap_or_else(|| "http".to_owned());
        let netloc = header_value(headers, "host")
            .map(str::to_owned)
            .or_else(|| uri.authority().map(|a| a.as_str().to_owned()))
            .or_else(|| server.map(|addr| addr.to_string()))
            .unwrap_or_default();

        Self {
            scheme,
            netloc,
            path: uri.path().to_owned(),
            query: uri.query().unwrap_or_default().to_owned(),
            fragment: String::new(),
        }
    }
}

impl fmt::Display for UrlComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scheme='{}', netloc='{}', path='{}', query='{}', fragment='{}'",
            self.scheme, self.netloc, self.path, self.query, self.fragment,
        )
    }
}

/// Serialized as its display string.
impl Serialize for UrlComponents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
