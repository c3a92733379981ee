//! In-memory LRU cache backend.

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use silo_core::{Cache, Error, ObjectReader, OpContext, Result};
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tokio::io::AsyncReadExt;

/// A bounded in-memory [`Cache`] keeping up to `capacity` objects with LRU
/// eviction. Used for tests and small deployments. Operations complete
/// without suspension, so the context is not consulted.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Bytes>>,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn fetch(&self, _ctx: &OpContext, key: &str) -> Result<ObjectReader> {
        let mut entries = self.entries.lock().expect("memory cache poisoned");
        match entries.get(key) {
            Some(data) => Ok(Box::pin(Cursor::new(data.clone()))),
            None => Err(Error::Miss),
        }
    }

    async fn store(&self, _ctx: &OpContext, key: &str, mut data: ObjectReader) -> Result<()> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf).await?;
        self.entries
            .lock()
            .expect("memory cache poisoned")
            .put(key.to_string(), Bytes::from(buf));
        Ok(())
    }
}
