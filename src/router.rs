//! Route table and the innermost pipeline stage.
//!
//! Routes live in one `matchit` tree per method. A path that matches under a
//! different method answers 405, anything else unmatched 404. Handler
//! validation failures are turned into the 422 envelope here, so middleware
//! above only ever sees them as responses.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::exception::{HandlerError, catch_panic, failure_response, validation_response};
use crate::handler::{BoxedHandler, Handler, Outcome};
use crate::middleware::{self, Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Routes plus the middleware stack wrapped around them. Built once at
/// startup and handed to [`Server::serve`](crate::Server::serve).
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    layers: Vec<Arc<dyn Middleware>>,
}

pub(crate) enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    MethodNotAllowed,
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), layers: Vec::new() }
    }

    /// Registers `handler` for `method` on `path`.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use vestibule::{Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", get_user)
    ///     .on(Method::POST, "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or collides with one already
    /// registered for the same method. Routes are fixed at startup, so this
    /// surfaces immediately.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self { self.on(Method::GET, path, handler) }
    pub fn post(self, path: &str, handler: impl Handler) -> Self { self.on(Method::POST, path, handler) }
    pub fn put(self, path: &str, handler: impl Handler) -> Self { self.on(Method::PUT, path, handler) }
    pub fn patch(self, path: &str, handler: impl Handler) -> Self { self.on(Method::PATCH, path, handler) }
    pub fn delete(self, path: &str, handler: impl Handler) -> Self { self.on(Method::DELETE, path, handler) }

    /// Wrap every request in `middleware`. The first layer added is the
    /// outermost: it sees the request first and the response last.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let handler = Arc::clone(matched.value);
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(handler, params);
        }

        let elsewhere = self.routes.iter()
            .any(|(m, tree)| m != method && tree.at(path).is_ok());
        if elsewhere { Lookup::MethodNotAllowed } else { Lookup::NotFound }
    }

    /// Runs one request through the middleware stack and the matched handler.
    ///
    /// Always produces a response. A failure or panic that no middleware
    /// turned into a response on the way up is answered here.
    pub async fn handle(self: Arc<Self>, req: Request) -> Response {
        let head = req.head().clone();
        let router = Arc::clone(&self);
        let endpoint = Next::new(move |req| Box::pin(Arc::clone(&router).dispatch(req)));
        let chain = middleware::chain(&self.layers, endpoint);

        match catch_panic(chain.run(req)).await {
            Ok(response) => response,
            Err(err) => failure_response(&head, &err),
        }
    }

    /// The innermost stage: route lookup, then the handler. Validation
    /// failures are answered here, before anything above sees an error.
    async fn dispatch(self: Arc<Self>, mut req: Request) -> Outcome {
        let (handler, params) = match self.lookup(req.method(), req.path()) {
            Lookup::Found(handler, params) => (handler, params),
            Lookup::MethodNotAllowed => return Ok(Response::status(StatusCode::METHOD_NOT_ALLOWED)),
            Lookup::NotFound => return Ok(Response::status(StatusCode::NOT_FOUND)),
        };
        req.params = params;

        let head = req.head().clone();
        match handler.call(req).await {
            Err(HandlerError::Validation(err)) => Ok(validation_response(&head, &err)),
            outcome => outcome,
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
