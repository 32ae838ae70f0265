use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

const LOG_TARGET: &str = "server::http";

/// Logs each request with a correlation id and its outcome.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let correlation_id = Uuid::new_v4().to_string();

    tracing::info!(
        target = LOG_TARGET,
        %method,
        %path,
        %correlation_id,
        "incoming request"
    );

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();

    tracing::info!(
        target = LOG_TARGET,
        %method,
        %path,
        %correlation_id,
        status = response.status().as_u16(),
        duration_ms = duration.as_millis() as u64,
        "request completed"
    );

    response
}
