//! Request metrics middleware.

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

use crate::kernel::metrics;

/// Record a counter and latency histogram per handled request, labeled by
/// the matched route template (never the raw path, which would explode
/// label cardinality).
pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    metrics::http_request(&method, &path, response.status().as_u16(), started.elapsed());
    response
}
