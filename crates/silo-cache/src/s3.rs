//! S3-backed cache.
//!
//! Objects are fetched through parallel range downloads feeding a block
//! reassembly pipe, so bytes start flowing to the consumer before the
//! download completes. Uploads are buffered multipart transfers. Every
//! fetch also triggers a best-effort "touch" that rewrites a recency
//! timestamp onto the object, emulating last-accessed tracking for
//! eviction policies in a store that has none.

use crate::{keys, pipe};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, MetadataDirective};
use silo_core::{Cache, Error, ObjectReader, OpContext, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Default transfer part size (download ranges and upload parts).
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;
/// Default number of parallel range downloads per fetch.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Configuration for one [`S3Cache`] namespace.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket holding the cached objects.
    pub bucket: String,
    /// Key prefix; a trailing slash is appended if missing.
    pub prefix: String,
    pub part_size: u64,
    pub concurrency: usize,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// A [`Cache`] backed by an S3 bucket.
///
/// Keys are sanitized before storage: only `[A-Za-z0-9_-]` survive, all
/// other characters become `_`. Keys that collide after sanitization refer
/// to the same object; avoiding that is the caller's obligation.
///
/// The instance owns a shutdown signal and a task-completion group shared
/// by all in-flight operations; call [`S3Cache::shutdown`] before dropping
/// it so no transfer outlives the process.
pub struct S3Cache {
    client: Client,
    bucket: String,
    prefix: String,
    part_size: u64,
    concurrency: usize,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl S3Cache {
    pub fn new(client: Client, config: S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket,
            prefix: keys::normalize_prefix(&config.prefix),
            part_size: config.part_size.max(1),
            concurrency: config.concurrency.max(1),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Build a cache using the ambient AWS environment (region, credentials,
    /// endpoint overrides).
    pub async fn from_env(config: S3Config) -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&sdk_config), config)
    }

    fn real_key(&self, key: &str) -> String {
        keys::real_key(&self.prefix, key)
    }

    /// Signal all in-flight operations to stop and wait for every tracked
    /// task to retire. Returns the context's cancellation condition if it
    /// fires first.
    pub async fn shutdown(&self, ctx: &OpContext) -> Result<()> {
        self.shutdown.cancel();
        self.tasks.close();
        ctx.run(self.tasks.wait()).await
    }

    /// Best-effort recency refresh: a metadata-only self-copy stamping
    /// `refreshed` with the current unix time. Failures are logged, never
    /// propagated.
    fn touch(&self, real_key: String) {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        self.tasks.spawn(async move {
            let source = format!("{bucket}/{real_key}");
            let refreshed = chrono::Utc::now().timestamp().to_string();
            let result = client
                .copy_object()
                .bucket(&bucket)
                .key(&real_key)
                .copy_source(&source)
                .metadata("refreshed", refreshed)
                .metadata_directive(MetadataDirective::Replace)
                .send()
                .await;
            match result {
                Ok(_) => debug!(bucket = %bucket, key = %real_key, "refreshed object recency"),
                Err(err) => error!(
                    bucket = %bucket,
                    key = %real_key,
                    error = %DisplayErrorContext(&err),
                    "object recency refresh failed"
                ),
            }
        });
    }

    async fn upload_parts(
        &self,
        ctx: &OpContext,
        real_key: &str,
        upload_id: &str,
        first: Vec<u8>,
        mut data: ObjectReader,
    ) -> Result<()> {
        let mut completed = Vec::new();
        let mut part_number = 1i32;
        let mut part = first;
        loop {
            let out = ctx
                .run(
                    self.client
                        .upload_part()
                        .bucket(&self.bucket)
                        .key(real_key)
                        .upload_id(upload_id)
                        .part_number(part_number)
                        .body(ByteStream::from(part))
                        .send(),
                )
                .await?
                .map_err(|err| Error::backend("s3 upload part", DisplayErrorContext(&err)))?;
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(out.e_tag().map(str::to_string))
                    .build(),
            );
            part_number += 1;
            part = read_part(&mut data, self.part_size as usize).await?;
            if part.is_empty() {
                break;
            }
        }
        ctx.run(
            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(real_key)
                .upload_id(upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(completed))
                        .build(),
                )
                .send(),
        )
        .await?
        .map_err(|err| Error::backend("s3 complete upload", DisplayErrorContext(&err)))?;
        Ok(())
    }
}

#[async_trait]
impl Cache for S3Cache {
    async fn fetch(&self, ctx: &OpContext, key: &str) -> Result<ObjectReader> {
        let real_key = self.real_key(key);

        // Existence probe under the caller's context.
        let head = ctx
            .run(
                self.client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(&real_key)
                    .send(),
            )
            .await?
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Error::Miss
                } else {
                    Error::backend("s3 head", DisplayErrorContext(&err))
                }
            })?;
        let size = head.content_length().unwrap_or(0).max(0) as u64;

        // The download context keeps the caller's deadline but is cancelled
        // only by instance shutdown or the deadline itself, so the returned
        // stream keeps flowing after the originating request ends.
        let download_ctx = ctx.detach();
        let (writer, reader) = pipe::new();

        let shutdown = self.shutdown.clone();
        let watch_ctx = download_ctx.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => watch_ctx.cancel(),
                _ = watch_ctx.done() => {}
            }
        });

        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let dl_key = real_key.clone();
        let part_size = self.part_size;
        let concurrency = self.concurrency;
        let task_ctx = download_ctx.clone();
        self.tasks.spawn(async move {
            let result = download(
                &client, &bucket, &dl_key, size, part_size, concurrency, &task_ctx, &writer,
            )
            .await;
            match result {
                Ok(()) => writer.close(),
                Err(err) => {
                    debug!(
                        bucket = %bucket,
                        key = %dl_key,
                        error = %err,
                        "ranged download failed"
                    );
                    writer.close_with_error(err);
                }
            }
            // Completing the context releases the shutdown watcher.
            task_ctx.cancel();
        });

        self.touch(real_key);
        Ok(Box::pin(reader))
    }

    async fn store(&self, ctx: &OpContext, key: &str, mut data: ObjectReader) -> Result<()> {
        let real_key = self.real_key(key);
        let part_size = self.part_size as usize;

        let first = read_part(&mut data, part_size).await?;
        if first.len() < part_size {
            // The whole payload fits in one part buffer.
            ctx.run(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&real_key)
                    .body(ByteStream::from(first))
                    .send(),
            )
            .await?
            .map_err(|err| Error::backend("s3 put", DisplayErrorContext(&err)))?;
            return Ok(());
        }

        let create = ctx
            .run(
                self.client
                    .create_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&real_key)
                    .send(),
            )
            .await?
            .map_err(|err| Error::backend("s3 create upload", DisplayErrorContext(&err)))?;
        let upload_id = create
            .upload_id()
            .ok_or_else(|| Error::backend("s3 create upload", "missing upload id"))?
            .to_string();

        match self
            .upload_parts(ctx, &real_key, &upload_id, first, data)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&real_key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        bucket = %self.bucket,
                        key = %real_key,
                        error = %DisplayErrorContext(&abort_err),
                        "failed to abort multipart upload"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Download the object in parallel fixed-size ranges, writing each range
/// into the pipe at its offset. Workers pull the next part index from a
/// shared counter; the first failure aborts the remaining work.
#[allow(clippy::too_many_arguments)]
async fn download(
    client: &Client,
    bucket: &str,
    key: &str,
    size: u64,
    part_size: u64,
    concurrency: usize,
    ctx: &OpContext,
    writer: &pipe::PipeWriter,
) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    let parts = size.div_ceil(part_size);
    let workers = concurrency.min(parts as usize);
    let next = Arc::new(AtomicU64::new(0));

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let client = client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        let ctx = ctx.clone();
        let writer = writer.clone();
        let next = next.clone();
        set.spawn(async move {
            loop {
                let part = next.fetch_add(1, Ordering::Relaxed);
                if part >= parts {
                    return Ok(());
                }
                let start = part * part_size;
                let end = (start + part_size).min(size) - 1;
                let object = ctx
                    .run(
                        client
                            .get_object()
                            .bucket(&bucket)
                            .key(&key)
                            .range(format!("bytes={start}-{end}"))
                            .send(),
                    )
                    .await?
                    .map_err(|err| Error::backend("s3 get", DisplayErrorContext(&err)))?;
                let body = ctx
                    .run(object.body.collect())
                    .await?
                    .map_err(|err| Error::backend("s3 get body", err))?;
                writer.write_at(&body.into_bytes(), start);
            }
        });
    }

    let mut result = Ok(());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                result = result.and(Err(err));
                set.abort_all();
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                result = result.and(Err(Error::Internal(format!(
                    "download worker panicked: {join_err}"
                ))));
            }
        }
    }
    result
}

/// Fill a part buffer from the reader, stopping early only at end of
/// stream. Returns fewer than `part_size` bytes exactly when the stream is
/// exhausted.
async fn read_part(data: &mut ObjectReader, part_size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; part_size];
    let mut filled = 0;
    while filled < part_size {
        let n = data.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = S3Config::new("bucket", "prefix");
        assert_eq!(config.part_size, DEFAULT_PART_SIZE);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_read_part_short_stream() {
        let mut data: ObjectReader = Box::pin(std::io::Cursor::new(b"abc".to_vec()));
        let part = read_part(&mut data, 8).await.unwrap();
        assert_eq!(part, b"abc");
        assert!(read_part(&mut data, 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_part_splits_at_part_size() {
        let mut data: ObjectReader = Box::pin(std::io::Cursor::new(b"abcdefgh".to_vec()));
        assert_eq!(read_part(&mut data, 5).await.unwrap(), b"abcde");
        assert_eq!(read_part(&mut data, 5).await.unwrap(), b"fgh");
    }
}
