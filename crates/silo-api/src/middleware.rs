//! HTTP middleware for the API server.

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Inject a request ID into each request and echo it on the response.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    if let Ok(value) = request_id.parse() {
        request.headers_mut().insert("x-request-id", value);
    }

    let mut response = next.run(request).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
