//! Cache object handlers.
//!
//! Hits stream straight from the backend: the response body is wired to
//! the fetch reader, so bytes flow before the download completes. A
//! backend error that surfaces mid-stream terminates the body; the status
//! line is already committed by then.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use silo_core::{Cache, Error};
use std::io;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error};

use crate::state::AppState;

pub async fn get_cas(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    get_object(&state, state.cas.as_ref(), "cas", &key).await
}

pub async fn get_ac(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    get_object(&state, state.ac.as_ref(), "ac", &key).await
}

pub async fn put_cas(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Body,
) -> StatusCode {
    put_object(&state, state.cas.as_ref(), "cas", &key, body).await
}

pub async fn put_ac(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Body,
) -> StatusCode {
    put_object(&state, state.ac.as_ref(), "ac", &key, body).await
}

async fn get_object(
    state: &AppState,
    cache: &dyn Cache,
    namespace: &'static str,
    key: &str,
) -> Response {
    if key.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let ctx = state.op_context();
    match cache.fetch(&ctx, key).await {
        Ok(reader) => {
            debug!(namespace, key, "cache hit");
            Body::from_stream(ReaderStream::new(reader)).into_response()
        }
        Err(Error::Miss) => {
            debug!(namespace, key, "cache miss");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => {
            error!(namespace, key, error = %err, "cache fetch failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn put_object(
    state: &AppState,
    cache: &dyn Cache,
    namespace: &'static str,
    key: &str,
    body: Body,
) -> StatusCode {
    if key.is_empty() {
        return StatusCode::NOT_FOUND;
    }
    let ctx = state.op_context();
    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = Box::pin(StreamReader::new(stream));
    match cache.store(&ctx, key, reader).await {
        Ok(()) => {
            debug!(namespace, key, "cache put");
            StatusCode::OK
        }
        Err(err) => {
            error!(namespace, key, error = %err, "cache store failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
