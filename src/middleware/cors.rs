//! Cross-origin resource sharing.
//!
//! Origins are matched exactly against the configured list; `*` in the list
//! admits any origin. Credentials are always allowed, so the allowed origin
//! is echoed back rather than answered with a literal `*`.

use std::sync::Arc;

use http::{Method, StatusCode};

use super::{Middleware, Next};
use crate::config::Settings;
use crate::handler::{BoxFuture, Outcome};
use crate::request::Request;
use crate::response::Response;

#[derive(Clone)]
pub struct Cors {
    origins: Arc<[String]>,
}

impl Cors {
    pub fn new(origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { origins: origins.into_iter().map(Into::into).collect() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.cors_origins.iter().cloned())
    }

    fn allows(&self, origin: &str) -> bool {
        self.origins.iter().any(|allowed| allowed == "*" || allowed == origin)
    }
}

impl Middleware for Cors {
    fn call(&self, req: Request, next: Next) -> BoxFuture<Outcome> {
        let Some(origin) = req.header("origin").map(str::to_owned) else {
            return Box::pin(next.run(req));
        };
        let allowed = self.allows(&origin);
        let preflight = *req.method() == Method::OPTIONS
            && req.header("access-control-request-method").is_some();

        if preflight {
            let response = if allowed {
                let methods = req.header("access-control-request-method").unwrap_or("*");
                let headers = req.header("access-control-request-headers").unwrap_or("*");
                let mut response = Response::status(StatusCode::OK);
                add_origin_headers(&mut response, &origin);
                response.insert_header("access-control-allow-methods", methods);
                response.insert_header("access-control-allow-headers", headers);
                response.insert_header("access-control-max-age", "600");
                response
            } else {
                Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .text("Disallowed CORS origin")
            };
            return Box::pin(async move { Ok(response) });
        }

        Box::pin(async move {
            let mut outcome = next.run(req).await;
            if allowed {
                if let Ok(response) = &mut outcome {
                    add_origin_headers(response, &origin);
                }
            }
            outcome
        })
    }
}

fn add_origin_headers(response: &mut Response, origin: &str) {
    response.insert_header("access-control-allow-origin", origin);
    response.insert_header("access-control-allow-credentials", "true");
    response.insert_header("vary", "origin");
}
