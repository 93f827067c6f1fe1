//! Unified error type.

use thiserror::Error;

use crate::body::BoxError;
use crate::config::ConfigError;

/// The error type returned by vestibule's fallible operations.
///
/// Application-level outcomes (404, 422, 500 envelopes) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: binding a port, reading a body off the wire,
/// loading settings, installing the log subscriber.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    /// The transport failed while a body was being read (connection reset,
    /// malformed chunked encoding, ...).
    #[error("body: {0}")]
    Body(#[source] BoxError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}
