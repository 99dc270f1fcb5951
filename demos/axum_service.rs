//! Example service wiring the full observability stack onto an axum app.
//!
//! Run with `cargo run --example axum_service`, then:
//!   curl -i localhost:8080/api/v1/hello
//!   curl -i localhost:8080/healthz
//!   curl -i localhost:8080/readyz
//!   curl -s localhost:8080/metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, Request},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use zola_observe::{
    HttpProbeOptions, Level, ObservabilityConfig, Probe, RequestLogger, Stack,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ObservabilityConfig::new("example-service");
    zola_observe::init(&config)?;

    let mut stack = Stack::new(config)?;
    stack.register_probe(Probe::new("database", || async {
        // A real service would ping its pool here.
        Ok::<(), std::convert::Infallible>(())
    }))?;
    stack.register_probe(Probe::http(
        "upstream-api",
        "http://localhost:9000/healthz",
        HttpProbeOptions::default(),
    ))?;
    let stack = Arc::new(stack);

    let api = Router::new()
        .route("/hello", get(hello))
        .route("/users/:id", get(get_user))
        .route("/users", post(create_user));

    let app = stack
        .instrument(Router::new().nest("/api/v1", api))
        .merge(stack.routes());

    let addr: SocketAddr = "0.0.0.0:8080".parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    stack
        .logger()
        .event(Level::Info, format!("server starting on {addr}"));
    axum::serve(listener, app).await?;
    Ok(())
}

async fn hello(req: Request) -> Json<Value> {
    // The per-request logger carries the correlation identifiers.
    let logger = RequestLogger::from_extensions(req.extensions());
    logger.event(Level::Info, "hello endpoint called");

    Json(json!({"message": "Hello, World!"}))
}

async fn get_user(Path(id): Path<String>, req: Request) -> Json<Value> {
    let logger = RequestLogger::from_extensions(req.extensions());
    logger.event(Level::Info, format!("fetching user {id}"));

    tokio::time::sleep(Duration::from_millis(10)).await;
    Json(json!({"id": id, "name": "John Doe"}))
}

async fn create_user(req: Request) -> (axum::http::StatusCode, Json<Value>) {
    let logger = RequestLogger::from_extensions(req.extensions());
    logger.event(Level::Info, "creating user");

    tokio::time::sleep(Duration::from_millis(20)).await;
    (
        axum::http::StatusCode::CREATED,
        Json(json!({"id": "123", "name": "New User"})),
    )
}
