//! Pipeline stages wrapped around the router.
//!
//! A [`Middleware`] gets the request and a [`Next`] for the rest of the
//! chain. It can answer on its own, or run the chain and then look at (or
//! rewrite) the [`Outcome`]. Layers run in registration order:
//!
//! ```text
//! Server → Cors → RequestInterceptor → route lookup → validation → handler
//! ```
//!
//! Built-in middleware:
//! - [`RequestInterceptor`]: body capture, timing, outcome logging, error envelopes
//! - [`Cors`]: configured-origin CORS headers and preflight answers
//!
//! The two body primitives the interceptor is built on are public too, for
//! middleware of your own: [`capture_request_body`] and [`buffer_response_body`].

mod cors;
mod intercept;
mod replay;

use std::sync::Arc;

use crate::handler::{BoxFuture, Outcome};
use crate::request::Request;

pub use cors::Cors;
pub use intercept::{PROCESS_TIME_HEADER, RequestInterceptor};
pub use replay::{buffer_response_body, capture_request_body};

/// A pipeline stage wrapped around every request.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> BoxFuture<Outcome>;
}

/// The remainder of the chain, as seen from one middleware.
#[derive(Clone)]
pub struct Next(Arc<dyn Fn(Request) -> BoxFuture<Outcome> + Send + Sync>);

impl Next {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn(Request) -> BoxFuture<Outcome> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Runs the rest of the chain.
    pub async fn run(self, req: Request) -> Outcome {
        (self.0)(req).await
    }
}

/// Wraps `endpoint` in `layers`, first layer outermost.
pub(crate) fn chain(layers: &[Arc<dyn Middleware>], endpoint: Next) -> Next {
    layers.iter().rev().fold(endpoint, |next, layer| {
        let layer = Arc::clone(layer);
        Next::new(move |req| layer.call(req, next.clone()))
    })
}
