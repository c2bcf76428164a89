use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

/// Stamps every response with `X-Request-ID` and `X-Response-Time` (§6, §7),
/// mirroring the request-context middleware in the grounding repo's upstream
/// client path. Applies uniformly to success and error responses alike,
/// since it wraps the whole router rather than individual handlers.
pub async fn stamp_response_metadata(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let mut response = next.run(request).await;

    let elapsed_ms = start.elapsed().as_millis();
    let headers = response.headers_mut();
    if let Ok(id) = HeaderValue::from_str(&request_id) {
        headers.insert("x-request-id", id);
    }
    if let Ok(timing) = HeaderValue::from_str(&format!("{elapsed_ms}ms")) {
        headers.insert("x-response-time", timing);
    }
    response
}
