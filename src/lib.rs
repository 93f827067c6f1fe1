//! # vestibule
//!
//! A minimal HTTP framework for Rust services behind a reverse proxy, built
//! around one idea: every request passes through the same interception
//! pipeline on its way in and out.
//!
//! ## The pipeline
//!
//! ```text
//! client ─▶ Server ─▶ Cors ─▶ RequestInterceptor ─▶ router ─▶ handler
//!              │                     │                  │
//!         access log,        capture body, time,   validation failures
//!         timeout            log, 500 envelope     → 422 envelope
//! ```
//!
//! - Request bodies are captured for the log and replayed to the handler.
//! - Non-200 response bodies are buffered for the log and re-emitted
//!   byte-for-byte; 200s stream straight through.
//! - A handler that fails (an `Err`, or a panic) never takes the connection
//!   down: the caller gets a JSON envelope, the log gets the full report.
//! - Every response carries `x-process-time`.
//!
//! What the reverse proxy already owns (TLS, rate limiting, body-size limits,
//! slow clients) vestibule leaves to it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use vestibule::middleware::{Cors, RequestInterceptor};
//! use vestibule::{HandlerError, Request, Response, Router, Server, Settings, health, logging};
//!
//! #[derive(serde::Deserialize)]
//! struct NewUser { name: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vestibule::Error> {
//!     let settings = Settings::from_env()?;
//!     logging::init(&settings)?;
//!
//!     let app = health::mount(Router::new(), &settings.api_prefix)
//!         .post("/api/v1/users", create_user)
//!         .layer(Cors::from_settings(&settings))
//!         .layer(RequestInterceptor::new(&settings));
//!
//!     Server::bind("0.0.0.0:3000")
//!         .request_timeout(settings.request_timeout)
//!         .serve(app)
//!         .await
//! }
//!
//! async fn create_user(mut req: Request) -> Result<Response, HandlerError> {
//!     // A body that is not a `NewUser` is answered with a 422 envelope.
//!     let user: NewUser = req.json().await?;
//!     Ok(Response::json(format!(r#"{{"name":"{}"}}"#, user.name).into_bytes()))
//! }
//! ```

mod body;
mod error;
mod exception;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod health;
pub mod logging;
pub mod middleware;

pub use body::{Body, BoxError};
pub use config::{ConfigError, LogExclusions, Settings};
pub use error::Error;
pub use exception::{
    ExceptionInfo, ExceptionLogDetail, FailureKind, HandlerError, VALIDATION_STATUS_CODE,
    ValidationError, normalize_message,
};
pub use handler::{BoxFuture, Handler, IntoOutcome, Outcome};
pub use request::{Request, RequestHead, UrlComponents};
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
