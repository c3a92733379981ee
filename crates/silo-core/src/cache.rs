//! The cache contract implemented by every backend.

use crate::context::OpContext;
use crate::error::Result;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// A readable stream of object bytes, positioned at the start of the
/// object. Dropping the reader releases it; no explicit close is needed.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Capability interface consumed by the HTTP dispatch layer and implemented
/// by the S3 and in-memory backends.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the object stored under `key`.
    ///
    /// Returns [`Error::Miss`](crate::Error::Miss) if the key does not
    /// exist. If the context fires before completion the cancellation
    /// condition is returned unwrapped; other backend failures are wrapped
    /// with backend context.
    async fn fetch(&self, ctx: &OpContext, key: &str) -> Result<ObjectReader>;

    /// Consume `data` to completion and persist it under `key`, overwriting
    /// any existing object. Last writer wins between concurrent stores.
    /// Cancellation and error wrapping follow the same rules as `fetch`.
    async fn store(&self, ctx: &OpContext, key: &str, data: ObjectReader) -> Result<()>;
}
