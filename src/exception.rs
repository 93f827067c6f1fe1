//! Failure taxonomy and the uniform JSON error envelopes.
//!
//! A handler either produces a response or fails. Failures come in exactly
//! two kinds:
//!
//! | Kind | Raised by | Status | Body |
//! |---|---|---|---|
//! | validation | [`ValidationError`] | 422 | `{"status_code": 10422, "message": .., "data": null}` |
//! | unhandled | any other error, a panic | 500 | [`ExceptionLogDetail`] |
//!
//! Validation failures from a handler are answered right after dispatch, so
//! the interceptor sees them as ordinary 422 responses. One raised by
//! middleware is answered by [`failure_response`] wherever it surfaces.
//! Unhandled failures travel up the chain as `Err(HandlerError)` until the
//! interceptor turns them into a 500.
//!
//! Callers get a short description; the log gets the full error chain.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

use futures_util::FutureExt;

use http::StatusCode;
use serde::Serialize;
use tracing::{error, info};

use crate::body::BoxError;
use crate::request::{RequestHead, UrlComponents};
use crate::response::Response;

/// Application status code carried in the validation envelope.
pub const VALIDATION_STATUS_CODE: u32 = 10422;

// ── ValidationError ───────────────────────────────────────────────────────────

/// The request's shape did not match what the handler declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str { &self.message }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<serde_json::Error> for ValidationError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

// ── HandlerError ──────────────────────────────────────────────────────────────

/// Which of the two failure paths a request took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Unhandled,
}

impl FailureKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unhandled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A failed handler invocation.
///
/// Any `std::error::Error + Send + Sync + 'static` converts into a
/// `HandlerError`, so `?` works inside handlers. A [`ValidationError`] keeps
/// its kind through that conversion even when it arrives boxed.
///
/// Deliberately not an `std::error::Error` itself: that would collide with
/// the blanket `From` impl.
pub enum HandlerError {
    Validation(ValidationError),
    Unhandled { source: BoxError, backtrace: Backtrace },
    Panicked { message: String, backtrace: Backtrace },
}

impl HandlerError {
    /// An unhandled failure described only by a message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::unhandled(message.into())
    }

    pub(crate) fn unhandled(source: BoxError) -> Self {
        Self::Unhandled { source, backtrace: Backtrace::force_capture() }
    }

    /// Builds the error from a `catch_unwind` payload. The backtrace is the
    /// one recorded at the panic site when the hook installed by
    /// [`catch_panic`] saw it, else the current one.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_owned());
        let backtrace = PANIC_BACKTRACE
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(Backtrace::force_capture);
        Self::Panicked { message, backtrace }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::Unhandled { .. } | Self::Panicked { .. } => FailureKind::Unhandled,
        }
    }

    /// Multi-line report for the operator log: the error, every source in
    /// its chain, and the stack trace.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let backtrace = match self {
            Self::Validation(_) => return out,
            Self::Unhandled { source, backtrace } => {
                let mut cause = source.source();
                while let Some(err) = cause {
                    out.push_str(&format!("\n  caused by: {err}"));
                    cause = err.source();
                }
                backtrace
            }
            Self::Panicked { backtrace, .. } => backtrace,
        };
        if backtrace.status() == BacktraceStatus::Captured {
            out.push_str(&format!("\nstack backtrace:\n{backtrace}"));
        }
        out
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        let boxed: BoxError = Box::new(e);
        match boxed.downcast::<ValidationError>() {
            Ok(validation) => Self::Validation(*validation),
            Err(other) => Self::unhandled(other),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => fmt::Display::fmt(e, f),
            Self::Unhandled { source, .. } => fmt::Display::fmt(source, f),
            Self::Panicked { message, .. } => write!(f, "handler panicked: {message}"),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => f.debug_tuple("Validation").field(e).finish(),
            Self::Unhandled { source, .. } => f.debug_tuple("Unhandled").field(source).finish(),
            Self::Panicked { message, .. } => f.debug_tuple("Panicked").field(message).finish(),
        }
    }
}

// ── Panics ────────────────────────────────────────────────────────────────────

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chains a panic hook (once per process) that records the panicking
/// thread's backtrace for [`HandlerError::from_panic`]. The previous hook
/// still runs.
fn record_panic_backtraces() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

/// Runs `fut`, turning a panic inside it into `Err(HandlerError::Panicked)`.
pub(crate) async fn catch_panic<F, T>(fut: F) -> Result<T, HandlerError>
where
    F: Future<Output = Result<T, HandlerError>>,
{
    record_panic_backtraces();
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::from_panic(payload)),
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ValidationEnvelope {
    status_code: u32,
    message: String,
    data: Option<serde_json::Value>,
}

/// Shallow request metadata attached to an unhandled failure.
#[derive(Clone, Debug, Serialize)]
pub struct ExceptionInfo {
    pub client: String,
    pub server: String,
    pub method: String,
    pub components: UrlComponents,
}

/// Body of the 500 response, and the structured record logged alongside it.
#[derive(Clone, Debug, Serialize)]
pub struct ExceptionLogDetail {
    pub detail: String,
    pub info: ExceptionInfo,
}

impl ExceptionLogDetail {
    pub fn new(head: &RequestHead, err: &HandlerError) -> Self {
        Self {
            detail: err.to_string().trim().to_owned(),
            info: ExceptionInfo {
                client: head.client_host(),
                server: head.server_host(),
                method: head.method().to_string(),
                components: head.components().clone(),
            },
        }
    }
}

/// Flattens a validation message onto one line.
pub fn normalize_message(message: &str) -> String {
    message.replace('\n', " ").replace("   ", " ")
}

/// Answers a validation failure: logs `"<base url>: <error>"` at error
/// severity and returns the 422 envelope.
pub(crate) fn validation_response(head: &RequestHead, err: &ValidationError) -> Response {
    error!("{}: {}", head.base_url(), err);

    let envelope = ValidationEnvelope {
        status_code: VALIDATION_STATUS_CODE,
        message: normalize_message(err.message()),
        data: None,
    };
    Response::builder()
        .status(FailureKind::Validation.status())
        .json(serde_json::to_vec(&envelope).unwrap_or_default())
}

/// Answers an unhandled failure: logs the full report at critical severity,
/// then the structured detail at info, and returns the 500 envelope.
pub(crate) fn unhandled_response(head: &RequestHead, err: &HandlerError) -> Response {
    let detail = ExceptionLogDetail::new(head, err);
    let body = serde_json::to_vec(&detail).unwrap_or_default();

    error!(severity = "critical", "{}", err.report());
    info!("{}", String::from_utf8_lossy(&body));

    Response::builder().status(FailureKind::Unhandled.status()).json(body)
}

/// Answers any failure that reached the top of the chain: validation
/// failures get the 422 envelope wherever they were raised, everything else
/// the 500 one.
pub(crate) fn failure_response(head: &RequestHead, err: &HandlerError) -> Response {
    match err {
        HandlerError::Validation(validation) => validation_response(head, validation),
        _ => unhandled_response(head, err),
    }
}
