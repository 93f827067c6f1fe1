//! The hyper server: connection accept loop, access log, request timeout
//! and graceful shutdown.
//!
//! Each accepted connection runs on its own task and is served as HTTP/1.1
//! or HTTP/2, whichever the client speaks. Every request on it is bounded by
//! the configured timeout (`408` when it runs out) and produces one line on
//! the `vestibule::access` log target.
//!
//! On SIGTERM or Ctrl-C the server stops accepting, waits for the
//! connections it already has, then [`Server::serve`] returns. That fits a
//! Kubernetes termination grace period as long as requests finish within it.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::body::Body;
use crate::config::Settings;
use crate::error::Error;
use crate::logging::ACCESS_TARGET;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

pub struct Server {
    addr: String,
    request_timeout: Duration,
}

impl Server {
    /// A server that will listen on `addr` (`"host:port"`). Nothing is bound
    /// until [`serve`](Server::serve).
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), request_timeout: Settings::default().request_timeout }
    }

    /// Upper bound on the time any single request may take.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Binds and serves `router` until a shutdown signal arrives and every
    /// open connection has finished.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let addr: SocketAddr = self.addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        let router = Arc::new(router);
        let request_timeout = self.request_timeout;

        info!(%addr, "vestibule listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let local_addr = stream.local_addr().ok();

                    let router = Arc::clone(&router);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            async move {
                                dispatch(router, req, remote_addr, local_addr, request_timeout).await
                            }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connections.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("vestibule stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the router under the timeout, then writes the
/// access-log line.
///
/// The error type is [`Infallible`]: every failure has already been turned
/// into a response, so hyper never sees an error.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    request_timeout: Duration,
) -> Result<http::Response<Body>, Infallible> {
    let method = req.method().clone();
    let version = req.version();
    let target = req.uri().path_and_query().map_or_else(|| "/".to_owned(), |pq| pq.to_string());

    let req = Request::from_http(req, Some(remote_addr), local_addr);
    let response = match tokio::time::timeout(request_timeout, router.handle(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(%method, path = target.as_str(), timeout = ?request_timeout, "request timed out");
            Response::status(StatusCode::REQUEST_TIMEOUT)
        }
    };

    info!(
        target: ACCESS_TARGET,
        "{remote_addr} - \"{method} {target} {version:?}\" {}",
        response.status_code().as_u16(),
    );

    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Ctrl-C, or SIGTERM on Unix. A handler that fails to install is logged and
/// never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
