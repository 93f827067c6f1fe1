//! Minimal vestibule service: one JSON resource, a health check, and the
//! full interception pipeline in front of both.
//!
//! Run with:
//!   LOG_LEVEL=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/v1/health-check
//!   curl http://localhost:3000/api/v1/items/42
//!   curl -X POST http://localhost:3000/api/v1/items \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"widget","quantity":3}'
//!   curl -X POST http://localhost:3000/api/v1/items -d '{"name":1}'   # 422
//!   curl http://localhost:3000/api/v1/explode                          # 500

use serde::{Deserialize, Serialize};
use vestibule::middleware::{Cors, RequestInterceptor};
use vestibule::{HandlerError, Request, Response, Router, Server, Settings, ValidationError, health, logging};

#[derive(Deserialize, Serialize)]
struct Item {
    name: String,
    quantity: u32,
}

#[tokio::main]
async fn main() -> Result<(), vestibule::Error> {
    let settings = Settings::from_env()?;
    logging::init(&settings)?;

    let prefix = settings.api_prefix.clone();
    let app = health::mount(Router::new(), &prefix)
        .get(&format!("{prefix}/items/{{id}}"), get_item)
        .post(&format!("{prefix}/items"), create_item)
        .get(&format!("{prefix}/explode"), explode)
        .layer(Cors::from_settings(&settings))
        .layer(RequestInterceptor::new(&settings));

    Server::bind("0.0.0.0:3000")
        .request_timeout(settings.request_timeout)
        .serve(app)
        .await
}

async fn get_item(req: Request) -> Result<Response, HandlerError> {
    let id: u64 = req
        .param("id")
        .unwrap_or_default()
        .parse()
        .map_err(|_| ValidationError::new("id: value is not a valid integer"))?;
    let item = Item { name: format!("item-{id}"), quantity: 1 };
    Ok(Response::json(serde_json::to_vec(&item)?))
}

async fn create_item(mut req: Request) -> Result<Response, HandlerError> {
    let item: Item = req.json().await?;
    Ok(Response::builder()
        .status(http::StatusCode::CREATED)
        .json(serde_json::to_vec(&item)?))
}

async fn explode(_req: Request) -> Result<Response, HandlerError> {
    Err(HandlerError::msg("the reactor is on fire"))
}
