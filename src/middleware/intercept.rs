//! The request interceptor.
//!
//! Wraps every request and is responsible for:
//!
//! 1. timing it, and reporting the time in an `x-process-time` header;
//! 2. capturing the request body for the log line, without taking it away
//!    from the handler;
//! 3. turning a failure anywhere below it, panics included, into the 422 or
//!    500 envelope;
//! 4. capturing the body of any non-200 response for the log line, without
//!    changing what the client receives;
//! 5. emitting one structured line per request.
//!
//! ```text
//! Start ─┬─ excluded path ─────────────┐
//!        └─ capture request body ──────┤
//!                                      ▼
//!                               HandlerInvoked
//!                 ┌────────────────────┴───────────────────┐
//!              Ok(resp)                               Err(HandlerError)
//!        status ≠ 200 → buffer body              500 envelope, critical + info
//!                 └────────────────────┬───────────────────┘
//!                              ResponseFinalized
//!                  x-process-time, request line (unless health check)
//! ```
//!
//! Handler validation failures are answered right after dispatch and arrive
//! here as ordinary 422 responses. One raised by a middleware below still
//! reaches the `Err` arm and gets the 422 envelope there.

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use tracing::info;

use super::replay::{buffer_response_body, capture_request_body};
use super::{Middleware, Next};
use crate::config::{LogExclusions, Settings};
use crate::exception::{HandlerError, catch_panic, failure_response};
use crate::handler::{BoxFuture, Outcome};
use crate::request::Request;
use crate::response::Response;

/// Header carrying the wall-clock processing time, in seconds.
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Times, logs, and normalises the outcome of every request.
///
/// Shares its configuration read-only across all requests; all per-request
/// state lives in the request's own future, so concurrent requests never see
/// each other's bodies or timings.
#[derive(Clone)]
pub struct RequestInterceptor {
    exclusions: Arc<LogExclusions>,
    health_check_marker: Arc<str>,
}

impl RequestInterceptor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            exclusions: Arc::new(settings.log_exclusions.clone()),
            health_check_marker: Arc::from(settings.health_check_marker.as_str()),
        }
    }

    async fn intercept(&self, mut req: Request, next: Next) -> Response {
        let start = Instant::now();
        let head = req.head().clone();
        let excluded = self.exclusions.matches(head.path());

        // Panics anywhere below, capture included, end up in the Err arm.
        let mut request_body = String::new();
        let outcome: Outcome = catch_panic(async {
            if !excluded {
                let bytes = capture_request_body(&mut req).await.map_err(HandlerError::from)?;
                request_body = String::from_utf8_lossy(&bytes).into_owned();
            }
            next.run(req).await
        })
        .await;

        let mut response_body = String::new();
        let mut response = match outcome {
            Ok(mut response) if response.status_code() != StatusCode::OK && !excluded => {
                let buffered = catch_panic(async {
                    buffer_response_body(&mut response).await.map_err(HandlerError::from)
                })
                .await;
                match buffered {
                    Ok(bytes) => {
                        response_body = String::from_utf8_lossy(&bytes).into_owned();
                        response
                    }
                    Err(err) => failure_response(&head, &err),
                }
            }
            Ok(response) => response,
            Err(err) => failure_response(&head, &err),
        };

        let elapsed = start.elapsed().as_secs_f64();

        if !head.path().contains(&*self.health_check_marker) {
            let status = response.status_code().as_u16();
            info!(
                method = %head.method(),
                path = head.path(),
                status,
                elapsed = format_args!("{elapsed:.3}"),
                request_body = request_body.as_str(),
                response_body = response_body.as_str(),
                "\"{} {}\" {} ({:.3}s) [{}] [{}]",
                head.method(),
                head.path(),
                status,
                elapsed,
                request_body,
                response_body,
            );
        }

        response.set_header(PROCESS_TIME_HEADER, elapsed.to_string());
        response
    }
}

impl Middleware for RequestInterceptor {
    fn call(&self, req: Request, next: Next) -> BoxFuture<Outcome> {
        let this = self.clone();
        Box::pin(async move { Ok(this.intercept(req, next).await) })
    }
}
