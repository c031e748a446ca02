//! Object store client
//!
//! Wraps a [`BlobStore`] with the operations the archiver needs:
//! - paginated key listing with offset/count windows
//! - whole and ranged reads, optionally through a weight-bounded cache
//! - writes stamped with bucket-owner access
//! - prefix deletes and counts
//! - select pushdown
//!
//! Every backend call is bounded by the request timeout and logged with the
//! time it took.
//!
//! The cache is keyed by (bucket, key, range, version). Versions come from a
//! `head` call, so a rewritten object is never served from a stale entry.
//! Clones of a client share one cache.

use super::blob::{Acl, BlobStore, ByteRange, GetResult, ObjectMeta, PutMode, PutOptions};
use super::error::{ObjectStoreError, ObjectStoreResult};
use super::select::{SelectFormat, SelectRequest, SelectRows};
use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use moka::future::Cache;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for the client
#[derive(Debug, Clone)]
pub struct ObjectStoreClientConfig {
    /// Maximum total size of cached object bytes
    pub cache_capacity_bytes: u64,
    /// Upper bound on any single backend call
    pub request_timeout: Duration,
}

impl Default for ObjectStoreClientConfig {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: 1024 * 1024 * 1024, // 1GB
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    bucket: String,
    key: String,
    range: ByteRange,
    version: String,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached reads answered without loading
    pub hits: u64,
    /// Cached reads that loaded from the backend
    pub misses: u64,
    /// Cached reads that failed and were retried directly
    pub fallbacks: u64,
    pub entry_count: u64,
    pub weighted_size: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
}

/// Blob store client with a shared read cache
#[derive(Clone)]
pub struct ObjectStoreClient {
    store: Arc<dyn BlobStore>,
    cache: Cache<CacheKey, Bytes>,
    counters: Arc<CacheCounters>,
    request_timeout: Duration,
}

impl ObjectStoreClient {
    pub fn new(store: Arc<dyn BlobStore>, config: ObjectStoreClientConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity_bytes)
            .weigher(|_key: &CacheKey, value: &Bytes| -> u32 {
                u32::try_from(value.len()).unwrap_or(u32::MAX)
            })
            .build();

        tracing::info!(
            "Object store client over {} backend (cache {} bytes, timeout {:?})",
            store.name(),
            config.cache_capacity_bytes,
            config.request_timeout
        );

        Self {
            store,
            cache,
            counters: Arc::new(CacheCounters::default()),
            request_timeout: config.request_timeout,
        }
    }

    /// The wrapped backend
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = ObjectStoreResult<T>>,
    ) -> ObjectStoreResult<T> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| ObjectStoreError::Timeout {
                operation,
                after: self.request_timeout,
            })?
    }

    pub async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
        self.timed("bucket_exists", self.store.bucket_exists(bucket)).await
    }

    pub async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        self.timed("create_bucket", self.store.create_bucket(bucket)).await?;
        tracing::info!("Created bucket {}", bucket);
        Ok(())
    }

    /// Keys under `prefix`, skipping `offset` and returning at most `count`
    ///
    /// A negative `count` returns every key. Pages wholly before `offset`
    /// are skipped without inspection, and listing stops as soon as `count`
    /// keys are collected.
    pub async fn list_keys(
        &self,
        bucket: &str,
        prefix: &str,
        offset: usize,
        count: i64,
    ) -> ObjectStoreResult<BTreeSet<String>> {
        let started = Instant::now();
        let mut keys = BTreeSet::new();
        if count == 0 {
            return Ok(keys);
        }

        let mut index = 0usize;
        let mut token: Option<String> = None;
        loop {
            let page = self
                .timed("list", self.store.list_page(bucket, prefix, token.as_deref()))
                .await?;

            if index + page.keys.len() <= offset {
                index += page.keys.len();
            } else {
                for key in page.keys {
                    index += 1;
                    if index <= offset {
                        continue;
                    }
                    keys.insert(key);
                    if count > 0 && keys.len() as i64 == count {
                        tracing::debug!(
                            "Listed {} keys in {}/{} from {} in {}ms",
                            keys.len(),
                            bucket,
                            prefix,
                            offset,
                            started.elapsed().as_millis()
                        );
                        return Ok(keys);
                    }
                }
            }

            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        tracing::debug!(
            "Listed {} keys in {}/{} from {} in {}ms",
            keys.len(),
            bucket,
            prefix,
            offset,
            started.elapsed().as_millis()
        );
        Ok(keys)
    }

    /// Object attributes, `None` when missing
    pub async fn head(&self, bucket: &str, key: &str) -> ObjectStoreResult<Option<ObjectMeta>> {
        self.timed("head", self.store.head(bucket, key)).await
    }

    pub async fn object_exists(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
        Ok(self.head(bucket, key).await?.is_some())
    }

    /// Read a range of an object, `None` when missing
    pub async fn get_bytes(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> ObjectStoreResult<Option<Bytes>> {
        Ok(self
            .get_with_meta(bucket, key, range)
            .await?
            .map(|(bytes, _)| bytes))
    }

    /// Read a whole object together with its attributes
    ///
    /// The version in the returned meta is the one the bytes were read at,
    /// suitable for a conditional rewrite.
    pub async fn get_versioned(
        &self,
        bucket: &str,
        key: &str,
    ) -> ObjectStoreResult<Option<(Bytes, ObjectMeta)>> {
        self.get_with_meta(bucket, key, ByteRange::Full).await
    }

    async fn get_with_meta(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> ObjectStoreResult<Option<(Bytes, ObjectMeta)>> {
        let started = Instant::now();
        let read = async {
            let Some(GetResult { meta, stream }) = self.store.get(bucket, key, range).await? else {
                return Ok(None);
            };
            let body = stream
                .try_fold(BytesMut::new(), |mut body, chunk| async move {
                    body.extend_from_slice(&chunk);
                    Ok(body)
                })
                .await?;
            Ok::<_, ObjectStoreError>(Some((body.freeze(), meta)))
        };
        let result = self.timed("get", read).await?;

        tracing::debug!(
            "Read {}/{} ({:?}, {} bytes) in {}ms",
            bucket,
            key,
            range,
            result.as_ref().map(|(b, _)| b.len()).unwrap_or(0),
            started.elapsed().as_millis()
        );
        Ok(result)
    }

    /// Read a range through the shared cache
    ///
    /// Any cache failure falls back to a direct read, and a missing object
    /// reads as `None` either way.
    pub async fn get_bytes_cached(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> ObjectStoreResult<Option<Bytes>> {
        let version = match self.head(bucket, key).await {
            Ok(Some(meta)) => meta.version,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!("Cache lookup for {}/{} failed, reading directly: {}", bucket, key, e);
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                return self.get_bytes(bucket, key, range).await;
            }
        };

        let cache_key = CacheKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
            range,
            version: version.clone(),
        };
        let loaded_here = AtomicBool::new(false);
        let loaded = self
            .cache
            .try_get_with(cache_key, async {
                loaded_here.store(true, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let (bytes, meta) = self
                    .get_with_meta(bucket, key, range)
                    .await?
                    .ok_or_else(|| ObjectStoreError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })?;
                // Bytes are only cached under the version they were read at
                if meta.version != version {
                    return Err(ObjectStoreError::VersionChanged {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        expected: version.clone(),
                        found: meta.version,
                    });
                }
                Ok(bytes)
            })
            .await;

        match loaded {
            Ok(bytes) => {
                if !loaded_here.load(Ordering::Relaxed) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Some(bytes))
            }
            Err(e) if matches!(e.as_ref(), ObjectStoreError::VersionChanged { .. }) => {
                tracing::debug!("{}, reading {}/{} uncached", e, bucket, key);
                self.get_bytes(bucket, key, range).await
            }
            Err(e) => {
                tracing::warn!("Cached read of {}/{} failed, reading directly: {}", bucket, key, e);
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                self.get_bytes(bucket, key, range).await
            }
        }
    }

    /// Write an object with bucket-owner access
    ///
    /// Fails with `BucketNotFound` if the bucket is missing.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: BTreeMap<String, String>,
    ) -> ObjectStoreResult<ObjectMeta> {
        self.put_object_conditional(bucket, key, body, metadata, PutMode::Overwrite)
            .await
    }

    /// Write an object under a precondition
    pub async fn put_object_conditional(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: BTreeMap<String, String>,
        mode: PutMode,
    ) -> ObjectStoreResult<ObjectMeta> {
        let started = Instant::now();
        let size = body.len();
        let options = PutOptions {
            mode,
            acl: Acl::BucketOwnerFullControl,
            metadata,
        };
        let meta = self
            .timed("put", self.store.put(bucket, key, body, options))
            .await?;

        tracing::info!(
            "Wrote {}/{} ({} bytes, version {}) in {}ms",
            bucket,
            key,
            size,
            meta.version,
            started.elapsed().as_millis()
        );
        Ok(meta)
    }

    /// Delete one object, returning whether it existed
    pub async fn delete_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
        let started = Instant::now();
        let existed = self.timed("delete", self.store.delete(bucket, key)).await?;
        tracing::info!(
            "Deleted {}/{} (existed: {}) in {}ms",
            bucket,
            key,
            existed,
            started.elapsed().as_millis()
        );
        Ok(existed)
    }

    /// Delete several objects in one batch
    pub async fn delete_objects(&self, bucket: &str, keys: &[String]) -> ObjectStoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        self.timed("delete_many", self.store.delete_many(bucket, keys))
            .await?;
        tracing::info!(
            "Deleted {} objects from {} in {}ms",
            keys.len(),
            bucket,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Delete everything under `prefix`; a missing bucket is a no-op
    pub async fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> ObjectStoreResult<()> {
        if !self.bucket_exists(bucket).await? {
            return Ok(());
        }

        let mut token: Option<String> = None;
        loop {
            let page = self
                .timed("list", self.store.list_page(bucket, prefix, token.as_deref()))
                .await?;
            self.delete_objects(bucket, &page.keys).await?;
            match page.next {
                Some(next) => token = Some(next),
                None => return Ok(()),
            }
        }
    }

    /// Number of keys under `prefix`, or -1 when the bucket is missing
    pub async fn count_objects(&self, bucket: &str, prefix: &str) -> ObjectStoreResult<i64> {
        if !self.bucket_exists(bucket).await? {
            return Ok(-1);
        }

        let mut total = 0i64;
        let mut token: Option<String> = None;
        loop {
            let page = self
                .timed("list", self.store.list_page(bucket, prefix, token.as_deref()))
                .await?;
            total += page.keys.len() as i64;
            match page.next {
                Some(next) => token = Some(next),
                None => return Ok(total),
            }
        }
    }

    /// Run a select expression against one object
    ///
    /// Rows are produced lazily; the timeout bounds opening the query, not
    /// consuming it.
    pub async fn select_query(
        &self,
        bucket: &str,
        key: &str,
        format: SelectFormat,
        expression: &str,
    ) -> ObjectStoreResult<SelectRows> {
        let started = Instant::now();
        let request = SelectRequest {
            format,
            expression: expression.to_string(),
        };
        let rows = self
            .timed("select", self.store.select(bucket, key, request))
            .await?;
        tracing::debug!(
            "Opened select on {}/{} in {}ms: {}",
            bucket,
            key,
            started.elapsed().as_millis(),
            expression
        );
        Ok(rows)
    }

    /// Flush pending cache maintenance so counts are current
    pub async fn sync_cache(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::blob::ListPage;
    use crate::objects::fs::FsBlobStore;
    use crate::objects::memory::MemoryBlobStore;
    use async_trait::async_trait;
    use tempfile::tempdir;

    async fn client_with_keys(page_size: usize, keys: &[&str]) -> ObjectStoreClient {
        let store = Arc::new(MemoryBlobStore::with_page_size(page_size));
        store.create_bucket("b").await.unwrap();
        for key in keys {
            store
                .put("b", key, Bytes::from(key.to_string()), PutOptions::default())
                .await
                .unwrap();
        }
        ObjectStoreClient::new(store, ObjectStoreClientConfig::default())
    }

    #[tokio::test]
    async fn test_list_keys_offset_and_count() {
        let keys: Vec<String> = (0..25).map(|i| format!("k{:02}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let client = client_with_keys(10, &refs).await;

        let all = client.list_keys("b", "", 0, -1).await.unwrap();
        assert_eq!(all.len(), 25);

        let window = client.list_keys("b", "", 12, 5).await.unwrap();
        assert_eq!(
            window.into_iter().collect::<Vec<_>>(),
            vec!["k12", "k13", "k14", "k15", "k16"]
        );

        let tail = client.list_keys("b", "", 20, 100).await.unwrap();
        assert_eq!(tail.len(), 5);

        assert!(client.list_keys("b", "", 0, 0).await.unwrap().is_empty());
        assert!(client.list_keys("b", "", 30, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_keys_missing_bucket() {
        let client = client_with_keys(10, &[]).await;
        let err = client.list_keys("nope", "", 0, -1).await.unwrap_err();
        assert!(err.is_not_found());
    }

    /// Counts list calls so early termination is observable
    struct CountingStore {
        inner: MemoryBlobStore,
        lists: AtomicU64,
        fail_gets: AtomicBool,
        slow_lists: AtomicBool,
    }

    #[async_trait]
    impl BlobStore for CountingStore {
        fn name(&self) -> &'static str {
            "counting"
        }
        async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
            self.inner.bucket_exists(bucket).await
        }
        async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
            self.inner.create_bucket(bucket).await
        }
        async fn list_page(
            &self,
            bucket: &str,
            prefix: &str,
            start_after: Option<&str>,
        ) -> ObjectStoreResult<ListPage> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            if self.slow_lists.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            self.inner.list_page(bucket, prefix, start_after).await
        }
        async fn head(&self, bucket: &str, key: &str) -> ObjectStoreResult<Option<ObjectMeta>> {
            self.inner.head(bucket, key).await
        }
        async fn get(
            &self,
            bucket: &str,
            key: &str,
            range: ByteRange,
        ) -> ObjectStoreResult<Option<GetResult>> {
            if self.fail_gets.load(Ordering::SeqCst) {
                return Err(ObjectStoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected",
                )));
            }
            self.inner.get(bucket, key, range).await
        }
        async fn put(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            options: PutOptions,
        ) -> ObjectStoreResult<ObjectMeta> {
            self.inner.put(bucket, key, body, options).await
        }
        async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
            self.inner.delete(bucket, key).await
        }
    }

    async fn counting_client(page_size: usize, count: usize) -> (Arc<CountingStore>, ObjectStoreClient) {
        counting_client_with(page_size, count, ObjectStoreClientConfig::default()).await
    }

    async fn counting_client_with(
        page_size: usize,
        count: usize,
        config: ObjectStoreClientConfig,
    ) -> (Arc<CountingStore>, ObjectStoreClient) {
        let store = Arc::new(CountingStore {
            inner: MemoryBlobStore::with_page_size(page_size),
            lists: AtomicU64::new(0),
            fail_gets: AtomicBool::new(false),
            slow_lists: AtomicBool::new(false),
        });
        store.create_bucket("b").await.unwrap();
        for i in 0..count {
            store
                .put("b", &format!("k{:03}", i), Bytes::from(vec![i as u8; 16]), PutOptions::default())
                .await
                .unwrap();
        }
        let client = ObjectStoreClient::new(store.clone(), config);
        (store, client)
    }

    #[tokio::test]
    async fn test_list_keys_stops_early() {
        let (store, client) = counting_client(10, 100).await;
        let keys = client.list_keys("b", "", 0, 5).await.unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);

        store.lists.store(0, Ordering::SeqCst);
        client.list_keys("b", "", 35, 3).await.unwrap();
        assert_eq!(store.lists.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_get_bytes_ranges() {
        let client = client_with_keys(10, &["hello"]).await;
        let full = client.get_bytes("b", "hello", ByteRange::Full).await.unwrap();
        assert_eq!(full.as_deref(), Some(&b"hello"[..]));

        let part = client
            .get_bytes("b", "hello", ByteRange::from_bounds(1, 2))
            .await
            .unwrap();
        assert_eq!(part.as_deref(), Some(&b"el"[..]));

        assert!(client.get_bytes("b", "nope", ByteRange::Full).await.unwrap().is_none());
        assert!(client.get_bytes("nobucket", "x", ByteRange::Full).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_reads_hit_and_track_versions() {
        let (_store, client) = counting_client(10, 1).await;

        let first = client.get_bytes_cached("b", "k000", ByteRange::Full).await.unwrap();
        let second = client.get_bytes_cached("b", "k000", ByteRange::Full).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.cache_stats().misses, 1);
        assert_eq!(client.cache_stats().hits, 1);

        // A rewrite changes the version, so the next read loads fresh bytes
        client
            .put_object("b", "k000", Bytes::from_static(b"new"), BTreeMap::new())
            .await
            .unwrap();
        let third = client.get_bytes_cached("b", "k000", ByteRange::Full).await.unwrap();
        assert_eq!(third.as_deref(), Some(&b"new"[..]));
        assert_eq!(client.cache_stats().misses, 2);

        client.sync_cache().await;
        assert_eq!(client.cache_stats().entry_count, 2);
    }

    #[tokio::test]
    async fn test_cached_read_falls_back_on_failure() {
        let (store, client) = counting_client(10, 1).await;
        store.fail_gets.store(true, Ordering::SeqCst);

        let err = client
            .get_bytes_cached("b", "k000", ByteRange::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::Io(_)));
        assert_eq!(client.cache_stats().fallbacks, 1);

        store.fail_gets.store(false, Ordering::SeqCst);
        assert!(client
            .get_bytes_cached("b", "k000", ByteRange::Full)
            .await
            .unwrap()
            .is_some());
        assert!(client
            .get_bytes_cached("b", "missing", ByteRange::Full)
            .await
            .unwrap()
            .is_none());
    }

    /// Filesystem store that rewrites an object while serving the next read
    struct RewritingStore {
        inner: FsBlobStore,
        rewrite_with: std::sync::Mutex<Option<Bytes>>,
    }

    #[async_trait]
    impl BlobStore for RewritingStore {
        fn name(&self) -> &'static str {
            "rewriting"
        }
        async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
            self.inner.bucket_exists(bucket).await
        }
        async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
            self.inner.create_bucket(bucket).await
        }
        async fn list_page(
            &self,
            bucket: &str,
            prefix: &str,
            start_after: Option<&str>,
        ) -> ObjectStoreResult<ListPage> {
            self.inner.list_page(bucket, prefix, start_after).await
        }
        async fn head(&self, bucket: &str, key: &str) -> ObjectStoreResult<Option<ObjectMeta>> {
            self.inner.head(bucket, key).await
        }
        async fn get(
            &self,
            bucket: &str,
            key: &str,
            range: ByteRange,
        ) -> ObjectStoreResult<Option<GetResult>> {
            let rewrite = self.rewrite_with.lock().unwrap().take();
            if let Some(body) = rewrite {
                self.inner.put(bucket, key, body, PutOptions::default()).await?;
            }
            self.inner.get(bucket, key, range).await
        }
        async fn put(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            options: PutOptions,
        ) -> ObjectStoreResult<ObjectMeta> {
            self.inner.put(bucket, key, body, options).await
        }
        async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
            self.inner.delete(bucket, key).await
        }
    }

    #[tokio::test]
    async fn test_rewrite_during_cached_read_is_not_cached() {
        let dir = tempdir().unwrap();
        let store = Arc::new(RewritingStore {
            inner: FsBlobStore::open(dir.path()).await.unwrap(),
            rewrite_with: std::sync::Mutex::new(None),
        });
        store.create_bucket("b").await.unwrap();
        let client = ObjectStoreClient::new(store.clone(), ObjectStoreClientConfig::default());
        client
            .put_object("b", "k", Bytes::from_static(b"A-contents"), BTreeMap::new())
            .await
            .unwrap();

        // The object changes between the version lookup and the read
        *store.rewrite_with.lock().unwrap() = Some(Bytes::from_static(b"B-contents"));
        let raced = client.get_bytes_cached("b", "k", ByteRange::Full).await.unwrap();
        assert_eq!(raced.as_deref(), Some(&b"B-contents"[..]));

        // Content-hash versions repeat once the old body is written back
        client
            .put_object("b", "k", Bytes::from_static(b"A-contents"), BTreeMap::new())
            .await
            .unwrap();
        let direct = client.get_bytes("b", "k", ByteRange::Full).await.unwrap();
        let cached = client.get_bytes_cached("b", "k", ByteRange::Full).await.unwrap();
        assert_eq!(cached, direct);
        assert_eq!(cached.as_deref(), Some(&b"A-contents"[..]));

        client.sync_cache().await;
        assert_eq!(client.cache_stats().entry_count, 1);
    }

    #[tokio::test]
    async fn test_cache_is_bounded_by_weight() {
        let config = ObjectStoreClientConfig {
            cache_capacity_bytes: 100,
            ..Default::default()
        };
        let (store, client) = counting_client_with(10, 0, config).await;
        for i in 0..5 {
            store
                .put("b", &format!("obj{}", i), Bytes::from(vec![i as u8; 40]), PutOptions::default())
                .await
                .unwrap();
        }

        for i in 0..5 {
            let bytes = client
                .get_bytes_cached("b", &format!("obj{}", i), ByteRange::Full)
                .await
                .unwrap();
            assert_eq!(bytes.map(|b| b.len()), Some(40));
        }

        client.sync_cache().await;
        let stats = client.cache_stats();
        assert!(stats.weighted_size <= 100, "{:?}", stats);
        assert!(stats.entry_count < 5, "{:?}", stats);
        assert_eq!(stats.misses, 5);
    }

    #[tokio::test]
    async fn test_backend_calls_time_out() {
        let config = ObjectStoreClientConfig {
            request_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let (store, client) = counting_client_with(10, 3, config).await;
        store.slow_lists.store(true, Ordering::SeqCst);

        let err = client.list_keys("b", "", 0, -1).await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::Timeout { operation: "list", .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::IoFailure);

        store.slow_lists.store(false, Ordering::SeqCst);
        assert_eq!(client.list_keys("b", "", 0, -1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_put_stamps_owner_acl() {
        let client = client_with_keys(10, &[]).await;
        let meta = client
            .put_object("b", "k", Bytes::from_static(b"x"), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(meta.acl, Acl::BucketOwnerFullControl);

        let err = client
            .put_object("missing", "k", Bytes::new(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_prefix_delete_and_count() {
        let client = client_with_keys(2, &["a/1", "a/2", "a/3", "a/4", "a/5", "b/1"]).await;
        assert_eq!(client.count_objects("b", "a/").await.unwrap(), 5);
        assert_eq!(client.count_objects("missing", "").await.unwrap(), -1);

        client.delete_by_prefix("b", "a/").await.unwrap();
        assert_eq!(client.count_objects("b", "a/").await.unwrap(), 0);
        assert_eq!(client.count_objects("b", "").await.unwrap(), 1);

        client.delete_by_prefix("missing", "").await.unwrap();
        assert!(client.object_exists("b", "b/1").await.unwrap());
        assert!(client.delete_object("b", "b/1").await.unwrap());
        assert!(!client.object_exists("b", "b/1").await.unwrap());
    }

    #[tokio::test]
    async fn test_select_query_streams_rows() {
        let client = client_with_keys(10, &[]).await;
        let body = "{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n";
        client
            .put_object("b", "rows", Bytes::from(body), BTreeMap::new())
            .await
            .unwrap();

        let rows: Vec<_> = client
            .select_query("b", "rows", SelectFormat::Json, "SELECT * FROM S3Object WHERE n >= 2")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let err = client
            .select_query("b", "rows", SelectFormat::Json, "SELEKT")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ObjectStoreError::InvalidSelect(_)));
    }
}
