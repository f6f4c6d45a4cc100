use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use spigot::{RequestLoggerConfig, RequestLoggerLayer};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tracing::{info, Level};

// Test handlers for our demo server
async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    "Hello, World!"
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    sleep(Duration::from_millis(50)).await; // Simulate some work
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            sleep(Duration::from_millis(200)).await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn large_response_handler() -> impl IntoResponse {
    // Well past the configured body limit, so the dump gets the marker
    "x".repeat(4096)
}

async fn login_handler(_body: Bytes) -> impl IntoResponse {
    axum::Json(serde_json::json!({ "token": "demo-token-123" }))
}

async fn health_handler() -> impl IntoResponse {
    "up"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    info!("Starting request logging demo server");

    // Configure the middleware with custom settings
    let config = RequestLoggerConfig {
        dump_headers: true,
        dump_body: true,
        body_limit: 256,
        skipper: Some(Arc::new(|req: &Request| req.uri().path() == "/healthz")),
        exclude_request_body_paths: vec!["^/login".into()],
        ..Default::default()
    };

    // Build the router; the request-id layer sits in front so every log
    // line carries a correlation id
    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/streaming", get(streaming_handler))
        .route("/large", get(large_response_handler))
        .route("/login", post(login_handler))
        .route("/healthz", get(health_handler))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(RequestLoggerLayer::new(config))
                .into_inner(),
        );

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting");
    info!("  POST /echo       - Echo request body");
    info!("  GET  /streaming  - Streaming response");
    info!("  GET  /large      - Large response (tests the body limit)");
    info!("  POST /login      - Request body excluded from the dump");
    info!("  GET  /healthz    - Skipped entirely");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello");
    info!("  curl -X POST -d 'Hello from client' http://localhost:3000/echo");
    info!("  curl -X POST -d 'user=admin&pass=hunter2' http://localhost:3000/login");
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/large");
    info!("  curl http://localhost:3000/healthz");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(listener, app).await?;

    Ok(())
}
