use axum::{
    Router, error_handling::HandleErrorLayer, extract::Request, http::StatusCode,
    response::IntoResponse, routing::get,
};
use gate_limit::{RateLimitConfig, RateLimiter};
use std::sync::Arc;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_gate::{GateError, RateLimitLayer, resolve};

#[tokio::main]
async fn main() {
    // 1. Build the limiter from a config preset
    let config = RateLimitConfig::moderate();
    let limiter = Arc::new(RateLimiter::from_config(&config).unwrap());

    // 2. Set up the layer: identify callers by client IP, keep /health open
    let layer = RateLimitLayer::<Request>::new(limiter, resolve::client_ip)
        .with_skip_path("/health")
        .with_overrides(config.endpoint_limits.clone());

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Gate!" }))
        .route("/health", get(|| async { "ok" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_gate_error))
                // 2. The middle layer: introduces BoxError
                .layer(layer)
                // 3. Converts the Route's Infallible to BoxError so that
                // RateLimitLayer is happy wrapping it.
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}

/// The signature must match BoxError -> IntoResponse
async fn handle_gate_error(err: tower::BoxError) -> impl IntoResponse {
    if let Some(gate_err) = err.downcast_ref::<GateError>() {
        gate_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
