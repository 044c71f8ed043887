pub(crate) mod non_streaming;
pub(crate) mod streaming;

use std::time::Instant;

use axum::response::Response;
use bytes::Bytes;

/// Everything the response paths need about one translated request.
pub(crate) struct ChatContext {
    pub request_id: String,
    pub created: u64,
    /// Model named by the client.
    pub model: String,
    /// Encoded generateContent request.
    pub upstream_body: Bytes,
    /// Latest user-authored text, for the synthetic reasoning preview.
    pub user_text: String,
    pub estimated_prompt_tokens: u64,
    pub started: Instant,
}

#[inline]
pub(crate) fn ok_json_response(body_bytes: Bytes) -> Response {
    let mut response = Response::new(axum::body::Body::from(body_bytes));
    *response.status_mut() = http::StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

#[inline]
pub(crate) fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
