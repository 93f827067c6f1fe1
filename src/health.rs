//! Built-in health-check endpoint.
//!
//! Mounted under the API prefix, so with default settings it answers at
//! `GET /api/v1/health-check`:
//!
//! ```rust,no_run
//! use vestibule::{Router, Settings, health};
//!
//! let settings = Settings::default();
//! let app = health::mount(Router::new(), &settings.api_prefix);
//! ```
//!
//! Its path contains the default health-check marker, so the interceptor
//! times it (the `x-process-time` header is still set) but writes no request
//! log line for it.

use crate::{Request, Response, Router};

/// Body of a successful health check.
pub const HEALTHY: &str = "Health Check Successful";

/// Always `200 OK` with [`HEALTHY`]. If the process can answer HTTP at all,
/// it is healthy; this handler intentionally has no dependencies.
pub async fn health_check(_req: Request) -> Response {
    Response::text(HEALTHY)
}

/// Registers [`health_check`] at `{prefix}/health-check`.
pub fn mount(router: Router, prefix: &str) -> Router {
    router.get(&format!("{}/health-check", prefix.trim_end_matches('/')), health_check)
}
