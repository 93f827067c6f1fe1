//! End-to-end behaviour of the interception pipeline: router, interceptor,
//! and error envelopes together, observed through the responses and the log.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use http::{Method, StatusCode};
use http_body::Frame;
use http_body_util::{Full, StreamBody};
use serde_json::{Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use vestibule::middleware::{Middleware, Next, PROCESS_TIME_HEADER, RequestInterceptor};
use vestibule::{
    BoxFuture, ContentType, HandlerError, LogExclusions, Outcome, Request, Response, Router,
    Settings, ValidationError, health,
};

// ── Log capture ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Line {
    level: Level,
    message: String,
    fields: HashMap<String, String>,
}

#[derive(Default)]
struct Fields {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.fields.insert(field.name().to_owned(), value.to_owned());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.insert(field.name().to_owned(), format!("{value:?}"));
        }
    }
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<Line>>>);

impl<S: Subscriber> Layer<S> for Captured {
    fn on_event(&self, event: &Event<'_>, _cx: Context<'_, S>) {
        let mut visitor = Fields::default();
        event.record(&mut visitor);
        self.0.lock().unwrap().push(Line {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

impl Captured {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    /// The interceptor's per-request lines.
    fn request_lines(&self) -> Vec<(String, HashMap<String, String>)> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.fields.contains_key("elapsed"))
            .map(|line| (line.message.clone(), line.fields.clone()))
            .collect()
    }

    fn at(&self, level: Level) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.level == level)
            .map(|line| line.message.clone())
            .collect()
    }

    fn critical(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.fields.get("severity").map(String::as_str) == Some("critical"))
            .map(|line| line.message.clone())
            .collect()
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct NewItem {
    name: String,
    quantity: u32,
}

async fn create_item(mut req: Request) -> Result<Response, HandlerError> {
    let item: NewItem = req.json().await?;
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .json(format!(r#"{{"name":"{}","quantity":{}}}"#, item.name, item.quantity).into_bytes()))
}

async fn echo(mut req: Request) -> Result<Response, HandlerError> {
    let first = req.text().await?;
    let second = req.text().await?;
    assert_eq!(first, second);
    Ok(Response::text(first))
}

async fn missing(_req: Request) -> Response {
    Response::builder().status(StatusCode::NOT_FOUND).json(br#"{"error":"not found"}"#.to_vec())
}

async fn broken(_req: Request) -> Result<Response, HandlerError> {
    Err(HandlerError::msg("ledger is corrupt"))
}

async fn panics(_req: Request) -> Response {
    panic!("handler exploded");
}

async fn rejects(_req: Request) -> Result<Response, HandlerError> {
    Err(ValidationError::new("quantity\nmust be positive").into())
}

async fn truncated(_req: Request) -> Response {
    let chunks = stream::iter([
        Ok(Bytes::from_static(br#"{"error":"#)),
        Err(io::Error::other("upstream went away")),
    ]);
    Response::builder().status(StatusCode::NOT_FOUND).stream(ContentType::Json, chunks)
}

async fn slow(req: Request) -> Response {
    let delay = req.param("ms").and_then(|ms| ms.parse().ok()).unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    Response::builder()
        .status(StatusCode::ACCEPTED)
        .text(format!("slept {delay}"))
}

fn app(settings: &Settings) -> Arc<Router> {
    Arc::new(
        health::mount(Router::new(), &settings.api_prefix)
            .post("/api/v1/items", create_item)
            .post("/api/v1/echo", echo)
            .post("/api/v1/secret/echo", echo)
            .get("/api/v1/missing", missing)
            .get("/api/v1/broken", broken)
            .get("/api/v1/panics", panics)
            .get("/api/v1/rejects", rejects)
            .get("/api/v1/slow/{ms}", slow)
            .get("/api/v1/truncated", truncated)
            .layer(RequestInterceptor::new(settings)),
    )
}

fn request(method: Method, path: &str, body: &'static str) -> Request {
    let client: SocketAddr = "10.0.0.7:51234".parse().unwrap();
    let server: SocketAddr = "127.0.0.1:8000".parse().unwrap();
    let req = http::Request::builder()
        .method(method)
        .uri(path)
        .header("host", "localhost:8000")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap();
    Request::from_http(req, Some(client), Some(server))
}

async fn body_of(response: Response) -> Bytes {
    response.into_body().to_bytes().await.unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_check_is_timed_but_not_logged() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let response = app.handle(request(Method::GET, "/api/v1/health-check", "")).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.header(PROCESS_TIME_HEADER).is_some());
    assert_eq!(&body_of(response).await[..], b"Health Check Successful");
    assert!(logs.request_lines().is_empty());
}

#[tokio::test]
async fn schema_violations_get_the_validation_envelope() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let response = app
        .handle(request(Method::POST, "/api/v1/items", r#"{"name":"widget","quantity":"three"}"#))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(body["status_code"], 10422);
    assert_eq!(body["data"], Value::Null);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("invalid type"), "{message}");

    let errors = logs.at(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("http://localhost:8000/: "), "{}", errors[0]);
    assert!(errors[0].contains("invalid type"));
}

#[tokio::test]
async fn validation_messages_are_flattened() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let response = app.handle(request(Method::GET, "/api/v1/rejects", "")).await;

    let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(
        body,
        json!({"status_code": 10422, "message": "quantity must be positive", "data": null})
    );
}

#[tokio::test]
async fn unhandled_errors_get_the_detail_envelope() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let response = app.handle(request(Method::GET, "/api/v1/broken?page=2", "")).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.header(PROCESS_TIME_HEADER).is_some());
    let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(body["detail"], "ledger is corrupt");
    assert_eq!(body["info"]["client"], "10.0.0.7");
    assert_eq!(body["info"]["server"], "127.0.0.1");
    assert_eq!(body["info"]["method"], "GET");
    let components = body["info"]["components"].as_str().unwrap();
    assert!(components.contains("path='/api/v1/broken'"), "{components}");
    assert!(components.contains("query='page=2'"), "{components}");

    let critical = logs.critical();
    assert_eq!(critical.len(), 1);
    assert!(critical[0].contains("ledger is corrupt"));
    assert!(logs.at(Level::INFO).iter().any(|line| line.contains(r#""detail":"ledger is corrupt""#)));
}

#[tokio::test]
async fn panics_are_answered_like_errors() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let response = app.handle(request(Method::GET, "/api/v1/panics", "")).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert!(body["detail"].as_str().unwrap().contains("handler exploded"));
    assert_eq!(logs.critical().len(), 1);
}

#[tokio::test]
async fn non_200_bodies_reach_the_client_and_the_log_unchanged() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let response = app.handle(request(Method::GET, "/api/v1/missing", "")).await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(&body_of(response).await[..], br#"{"error":"not found"}"#);

    let lines = logs.request_lines();
    assert_eq!(lines.len(), 1);
    let (message, fields) = &lines[0];
    assert!(message.starts_with(r#""GET /api/v1/missing" 404 ("#), "{message}");
    assert!(message.ends_with(r#"s) [] [{"error":"not found"}]"#), "{message}");
    assert_eq!(fields["response_body"], r#"{"error":"not found"}"#);
}

#[tokio::test]
async fn handlers_read_the_body_the_interceptor_captured() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let response = app.handle(request(Method::POST, "/api/v1/echo", "hello, twice")).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(&body_of(response).await[..], b"hello, twice");

    let lines = logs.request_lines();
    assert_eq!(lines[0].1["request_body"], "hello, twice");
    assert_eq!(lines[0].1["response_body"], "");
}

#[tokio::test]
async fn excluded_paths_log_without_bodies() {
    let logs = Captured::default();
    let _guard = logs.install();
    let settings = Settings::default().with_log_exclusions(LogExclusions::new(["/secret/"]));
    let app = app(&settings);

    let response = app.handle(request(Method::POST, "/api/v1/secret/echo", "hunter2")).await;

    assert_eq!(&body_of(response).await[..], b"hunter2");
    let lines = logs.request_lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].1["request_body"], "");
    assert_eq!(lines[0].1["response_body"], "");
}

#[tokio::test]
async fn concurrent_requests_keep_their_own_state() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let (slow, fast) = tokio::join!(
        Arc::clone(&app).handle(request(Method::GET, "/api/v1/slow/40", "")),
        Arc::clone(&app).handle(request(Method::GET, "/api/v1/slow/1", "")),
    );
    assert_eq!(&body_of(slow).await[..], b"slept 40");
    assert_eq!(&body_of(fast).await[..], b"slept 1");

    let lines = logs.request_lines();
    assert_eq!(lines.len(), 2);
    for (message, fields) in &lines {
        let path = fields["path"].as_str();
        let delay = path.rsplit('/').next().unwrap();
        assert!(message.contains(path), "{message}");
        assert_eq!(fields["response_body"], format!("slept {delay}"));
    }
    // The fast request finishes first.
    assert_eq!(lines[0].1["path"], "/api/v1/slow/1");
}

#[tokio::test]
async fn request_stream_failures_get_the_detail_envelope() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let chunks = stream::iter([
        Ok(Frame::data(Bytes::from_static(b"hello, "))),
        Err(io::Error::other("client reset")),
    ]);
    let req = http::Request::builder()
        .method(Method::POST)
        .uri("/api/v1/echo")
        .header("host", "localhost:8000")
        .body(StreamBody::new(chunks))
        .unwrap();
    let response = app.handle(Request::from_http(req, None, None)).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.header(PROCESS_TIME_HEADER).is_some());
    let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert!(body["detail"].as_str().unwrap().contains("client reset"), "{body}");
    assert_eq!(logs.critical().len(), 1);
    assert_eq!(logs.request_lines().len(), 1);
}

#[tokio::test]
async fn response_stream_failures_get_the_detail_envelope() {
    let logs = Captured::default();
    let _guard = logs.install();
    let app = app(&Settings::default());

    let response = app.handle(request(Method::GET, "/api/v1/truncated", "")).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.header(PROCESS_TIME_HEADER).is_some());
    let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert!(body["detail"].as_str().unwrap().contains("upstream went away"), "{body}");
    assert_eq!(logs.critical().len(), 1);
}

struct Exploding;

impl Middleware for Exploding {
    fn call(&self, req: Request, next: Next) -> BoxFuture<Outcome> {
        Box::pin(async move {
            if req.path().starts_with("/api/") {
                panic!("auth layer bug");
            }
            next.run(req).await
        })
    }
}

#[tokio::test]
async fn panics_in_inner_middleware_are_answered_like_errors() {
    let logs = Captured::default();
    let _guard = logs.install();
    let settings = Settings::default();
    let app = Arc::new(
        Router::new()
            .get("/api/v1/items", missing)
            .layer(RequestInterceptor::new(&settings))
            .layer(Exploding),
    );

    let response = app.handle(request(Method::GET, "/api/v1/items", "")).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.header(PROCESS_TIME_HEADER).is_some());
    let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert!(body["detail"].as_str().unwrap().contains("auth layer bug"), "{body}");
    assert_eq!(logs.critical().len(), 1);
}
