//! Route handlers and how the router stores them.
//!
//! Every registered handler is a different concrete type (each `async fn` is
//! its own type), but one route tree must hold all of them. Registration
//! erases the type once, and dispatch is a single virtual call:
//!
//! ```text
//! router.post("/items", create_item)
//!   └─ create_item.into_boxed_handler()   Arc<FnHandler<_>> as BoxedHandler
//! per request:
//!   └─ handler.call(req)                  BoxFuture<Outcome>
//!        └─ catch_unwind(create_item(req)) → into_outcome()
//! ```
//!
//! A handler may return a plain [`IntoResponse`] value, or a `Result` whose
//! error converts into [`HandlerError`]; `?` on any `std::error::Error`
//! works. Either way the chain receives an [`Outcome`]. A panicking handler
//! is caught at this boundary and reported as an `Err` as well.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::exception::{HandlerError, catch_panic};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Erased handlers ───────────────────────────────────────────────────────────

/// Boxed future returned by handlers and middleware. `Send` so the runtime
/// may poll it from any worker thread.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Result of running a request through the handler chain.
pub type Outcome = Result<Response, HandlerError>;

/// Object-safe call interface behind [`BoxedHandler`]. Public only because
/// [`Handler::into_boxed_handler`] names it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<Outcome>;
}

/// A registered handler, shared by every request routed to it.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── IntoOutcome ───────────────────────────────────────────────────────────────

/// Conversion of a handler's return value into an [`Outcome`].
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl<T: IntoResponse> IntoOutcome for T {
    fn into_outcome(self) -> Outcome {
        Ok(self.into_response())
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoResponse,
    E: Into<HandlerError>,
{
    fn into_outcome(self) -> Outcome {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

/// Anything the router accepts as a route handler: a `Fn(Request)` returning
/// a `Send` future whose output is [`IntoOutcome`]. Sealed; the blanket impl
/// below covers every `async fn(Request) -> impl IntoOutcome`.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Holds the concrete handler behind the [`ErasedHandler`] vtable.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<Outcome> {
        let fut = (self.0)(req);
        Box::pin(catch_panic(async move { fut.await.into_outcome() }))
    }
}
