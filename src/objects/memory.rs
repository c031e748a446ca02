//! In-memory blob store
//!
//! Buckets are ordered maps so listings come back sorted. Versions are a
//! process-wide counter, so every write gets a fresh one.

use super::blob::{chunked, BlobStore, ByteRange, GetResult, ListPage, ObjectMeta, PutMode, PutOptions};
use super::error::{ObjectStoreError, ObjectStoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Default listing page size, matching common object store limits
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    meta: ObjectMeta,
}

/// Blob store kept entirely in memory
#[derive(Debug)]
pub struct MemoryBlobStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    page_size: usize,
    next_version: AtomicU64,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Store whose listings return at most `page_size` keys per page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            next_version: AtomicU64::new(1),
        }
    }
}

pub(crate) fn check_precondition(
    bucket: &str,
    key: &str,
    mode: &PutMode,
    current: Option<&ObjectMeta>,
) -> ObjectStoreResult<()> {
    let failed = |reason: String| ObjectStoreError::PreconditionFailed {
        bucket: bucket.to_string(),
        key: key.to_string(),
        reason,
    };
    match (mode, current) {
        (PutMode::Overwrite, _) | (PutMode::Create, None) => Ok(()),
        (PutMode::Create, Some(meta)) => Err(failed(format!("exists at version {}", meta.version))),
        (PutMode::Update(expected), Some(meta)) if *expected == meta.version => Ok(()),
        (PutMode::Update(expected), Some(meta)) => Err(failed(format!(
            "expected version {}, found {}",
            expected, meta.version
        ))),
        (PutMode::Update(expected), None) => {
            Err(failed(format!("expected version {}, object is missing", expected)))
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
        Ok(self.buckets.read().await.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        if bucket.is_empty() {
            return Err(ObjectStoreError::InvalidName("empty bucket name".to_string()));
        }
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
    ) -> ObjectStoreResult<ListPage> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound {
                bucket: bucket.to_string(),
            })?;

        let lower = match start_after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };
        let mut keys: Vec<String> = objects
            .range((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let next = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }

    async fn head(&self, bucket: &str, key: &str) -> ObjectStoreResult<Option<ObjectMeta>> {
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.meta.clone()))
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> ObjectStoreResult<Option<GetResult>> {
        let buckets = self.buckets.read().await;
        let Some(object) = buckets.get(bucket).and_then(|objects| objects.get(key)) else {
            return Ok(None);
        };

        let span = range.resolve(object.data.len() as u64);
        let body = object.data.slice(span.start as usize..span.end as usize);
        Ok(Some(GetResult {
            meta: object.meta.clone(),
            stream: chunked(body),
        }))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> ObjectStoreResult<ObjectMeta> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound {
                bucket: bucket.to_string(),
            })?;

        check_precondition(bucket, key, &options.mode, objects.get(key).map(|o| &o.meta))?;

        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let meta = ObjectMeta {
            key: key.to_string(),
            size: body.len() as u64,
            version: format!("{:016x}", version),
            metadata: options.metadata,
            acl: options.acl,
        };
        objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                meta: meta.clone(),
            },
        );
        Ok(meta)
    }

    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
        Ok(self
            .buckets
            .write()
            .await
            .get_mut(bucket)
            .map(|objects| objects.remove(key).is_some())
            .unwrap_or(false))
    }
}
