//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, and latency.
//! Sits outside the auth pipeline so rejected requests are logged too.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info, warn};

pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Health checks are noisy
    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    match status {
        500.. => warn!(%method, path = %path, status, latency_ms, "Request failed (5xx)"),
        401 | 403 => info!(%method, path = %path, status, latency_ms, "Request rejected"),
        400.. => info!(%method, path = %path, status, latency_ms, "Request completed (4xx)"),
        _ => debug!(%method, path = %path, status, latency_ms, "Request completed"),
    }

    response
}
