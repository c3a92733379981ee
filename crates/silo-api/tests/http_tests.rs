//! Handler tests against in-memory cache backends.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use silo_api::{AppState, create_router};
use silo_cache::MemoryCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn app() -> Router {
    let capacity = NonZeroUsize::new(16).unwrap();
    let state = AppState::new(
        Arc::new(MemoryCache::new(capacity)),
        Arc::new(MemoryCache::new(capacity)),
        Some(Duration::from_secs(15)),
    );
    create_router(Arc::new(state))
}

fn put(uri: &str, body: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_put_then_get_round_trip() {
    let app = app();

    let res = app.clone().oneshot(put("/cas/abc123", b"hello")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.oneshot(get("/cas/abc123")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello");
}

#[tokio::test]
async fn test_get_missing_key_is_404() {
    let res = app().oneshot(get("/ac/missing")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let app = app();

    let res = app.clone().oneshot(put("/cas/shared", b"cas value")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.oneshot(get("/ac/shared")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_key_segment_is_404() {
    let res = app().oneshot(get("/cas/")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsupported_method_is_405() {
    let req = Request::builder()
        .method("POST")
        .uri("/cas/abc123")
        .body(Body::from("x"))
        .unwrap();
    let res = app().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_put_overwrites_existing_object() {
    let app = app();

    app.clone().oneshot(put("/ac/key", b"first")).await.unwrap();
    app.clone().oneshot(put("/ac/key", b"second")).await.unwrap();

    let res = app.oneshot(get("/ac/key")).await.unwrap();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"second");
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let res = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
}
