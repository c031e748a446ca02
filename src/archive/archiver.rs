//! Archive, restore and cold reads over chunked blob storage
//!
//! [`ChunkArchiver`] moves events between an [`EventStore`] and chunk
//! objects named by a [`ChunkIndex`]. Writes are fetch-merge-rewrite under a
//! version precondition, so concurrent archivers of one window never lose
//! each other's events, and re-archiving the same events is a no-op.

use super::chunk_index::{ChunkIndex, Window, DEFAULT_ARCHIVE_PREFIX};
use super::codec::{self, ChunkCompression};
use super::error::{ArchiveError, ArchiveResult};
use crate::events::{dedup_events, Event, EventQuery, EventStore, MemoryEventStore};
use crate::objects::{ByteRange, ObjectStoreClient, ObjectStoreError, PutMode, SelectFormat};
use crate::query::EventMatcher;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// How the tiered facade reads archived events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColdReadMode {
    /// Fetch whole chunks and filter locally
    #[default]
    Restore,
    /// Push the time range into a select on each chunk
    Select,
}

/// Archiver settings
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub bucket: String,
    /// Key prefix under which chunks live
    pub prefix: String,
    pub window_size_millis: i64,
    pub compression: ChunkCompression,
    /// Chunks processed at once by archive and restore
    pub max_concurrency: usize,
    /// Extra fetch-merge-rewrite attempts after a lost race
    pub max_write_retries: u32,
    pub cold_reads: ColdReadMode,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            bucket: "tierstore".to_string(),
            prefix: DEFAULT_ARCHIVE_PREFIX.to_string(),
            window_size_millis: 3_600_000,
            compression: ChunkCompression::None,
            max_concurrency: 8,
            max_write_retries: 5,
            cold_reads: ColdReadMode::Restore,
        }
    }
}

/// Outcome of an archive call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    /// Events read from the source after filtering
    pub events_read: usize,
    pub chunks_written: usize,
    /// Windows whose chunk already held every event
    pub chunks_unchanged: usize,
}

/// Outcome of a restore call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub chunks_restored: usize,
    pub events_restored: usize,
}

/// Moves events between an event store and cold storage
#[async_trait]
pub trait EventsArchiver: Send + Sync {
    /// Whether any chunk of `namespace` overlaps `[start, end]`
    async fn has_archives(&self, namespace: &str, start: i64, end: i64) -> ArchiveResult<bool>;

    /// Copy matching events in `[start, end]` from `source` into chunks
    ///
    /// Never deletes from `source`.
    async fn archive(
        &self,
        source: &dyn EventStore,
        namespace: &str,
        start: i64,
        end: i64,
        metadata_query: Option<&BTreeMap<String, String>>,
        dimensions_query: Option<&BTreeMap<String, String>>,
    ) -> ArchiveResult<ArchiveReport>;

    /// Store every event of the chunks overlapping `[start, end]` into
    /// `destination`
    async fn restore(
        &self,
        destination: &dyn EventStore,
        namespace: &str,
        start: i64,
        end: i64,
    ) -> ArchiveResult<RestoreReport>;

    /// Archive every event strictly before `end`
    async fn archive_all_before(
        &self,
        source: &dyn EventStore,
        namespace: &str,
        end: i64,
    ) -> ArchiveResult<ArchiveReport> {
        self.archive(source, namespace, i64::MIN, end.saturating_sub(1), None, None)
            .await
    }

    /// Archived events in `[start, end]`, with payloads, ascending
    async fn read_archives(&self, namespace: &str, start: i64, end: i64) -> ArchiveResult<Vec<Event>> {
        read_by_restore(self, namespace, start, end).await
    }
}

/// Restore into a scratch store and read the range back
async fn read_by_restore<A>(archiver: &A, namespace: &str, start: i64, end: i64) -> ArchiveResult<Vec<Event>>
where
    A: EventsArchiver + ?Sized,
{
    let scratch = MemoryEventStore::new();
    archiver.restore(&scratch, namespace, start, end).await?;
    let events = scratch
        .get(namespace, &EventQuery::range(start, end).with_payloads())
        .await?;
    Ok(events)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    Unchanged,
}

/// [`EventsArchiver`] backed by an [`ObjectStoreClient`]
pub struct ChunkArchiver {
    client: ObjectStoreClient,
    index: ChunkIndex,
    config: ArchiverConfig,
}

impl ChunkArchiver {
    /// Create an archiver, creating the bucket if it is missing
    pub async fn new(client: ObjectStoreClient, config: ArchiverConfig) -> ArchiveResult<Self> {
        let index = ChunkIndex::new(config.prefix.clone(), config.window_size_millis)?;
        if !client.bucket_exists(&config.bucket).await? {
            client.create_bucket(&config.bucket).await?;
        }

        tracing::info!(
            "Archiver ready: {}/{} ({}ms windows, {} compression, {:?} cold reads)",
            config.bucket,
            index.prefix(),
            index.window_size_millis(),
            config.compression.as_str(),
            config.cold_reads
        );

        Ok(Self {
            client,
            index,
            config,
        })
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    pub fn client(&self) -> &ObjectStoreClient {
        &self.client
    }

    /// Every chunk key of a namespace, ascending
    pub async fn chunk_keys(&self, namespace: &str) -> ArchiveResult<Vec<String>> {
        let keys = self
            .client
            .list_keys(&self.config.bucket, &self.index.namespace_prefix(namespace), 0, -1)
            .await?;
        Ok(keys.into_iter().collect())
    }

    /// Chunk keys of a namespace overlapping `[start, end]`
    pub async fn matching_chunks(&self, namespace: &str, start: i64, end: i64) -> ArchiveResult<Vec<String>> {
        let keys = self.chunk_keys(namespace).await?;
        Ok(self.index.matching_archives(namespace, keys, start, end))
    }

    /// Read one chunk through the cache; a vanished chunk reads as empty
    async fn read_chunk(&self, key: &str) -> ArchiveResult<Vec<Event>> {
        let Some(body) = self
            .client
            .get_bytes_cached(&self.config.bucket, key, ByteRange::Full)
            .await?
        else {
            return Ok(Vec::new());
        };
        Ok(dedup_events(codec::decode_chunk(&body)?))
    }

    /// Merge `events` into the chunk of `window`
    async fn write_window(
        &self,
        namespace: &str,
        key: &str,
        window: Window,
        events: Vec<Event>,
    ) -> ArchiveResult<WriteOutcome> {
        let bucket = &self.config.bucket;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let (mut merged, mode) = match self.client.get_versioned(bucket, key).await? {
                Some((body, meta)) => (codec::decode_chunk(&body)?, PutMode::Update(meta.version)),
                None => (Vec::new(), PutMode::Create),
            };

            let mut seen: HashSet<Event> = merged.iter().cloned().collect();
            let existing = merged.len();
            for event in &events {
                if seen.insert(event.clone()) {
                    merged.push(event.clone());
                }
            }
            if merged.len() == existing {
                tracing::debug!("Chunk {} already holds all {} events", key, events.len());
                return Ok(WriteOutcome::Unchanged);
            }

            let body = codec::encode_chunk(&merged, self.config.compression)?;
            let stats = codec::chunk_stats(&merged, &body);
            let metadata = BTreeMap::from([
                ("namespace".to_string(), namespace.to_string()),
                ("window-start".to_string(), window.start.to_string()),
                ("window-end".to_string(), window.end.to_string()),
                ("event-count".to_string(), merged.len().to_string()),
                ("compression".to_string(), self.config.compression.as_str().to_string()),
            ]);

            match self
                .client
                .put_object_conditional(bucket, key, Bytes::from(body), metadata, mode)
                .await
            {
                Ok(_) => {
                    tracing::debug!(
                        "Chunk {}: {} events ({} new), {} bytes, ratio {:.1}x",
                        key,
                        stats.event_count,
                        stats.event_count - existing,
                        stats.encoded_size,
                        stats.ratio
                    );
                    return Ok(WriteOutcome::Written);
                }
                Err(ObjectStoreError::PreconditionFailed { reason, .. }) => {
                    if attempts > self.config.max_write_retries {
                        return Err(ArchiveError::Conflict {
                            key: key.to_string(),
                            attempts,
                        });
                    }
                    tracing::warn!(
                        "Chunk {} changed during write (attempt {}): {}, retrying",
                        key,
                        attempts,
                        reason
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Archived events in `[start, end]` read with a select per chunk
    ///
    /// A chunk the select cannot read, such as one written compressed, is
    /// fetched whole instead.
    pub async fn select_events(&self, namespace: &str, start: i64, end: i64) -> ArchiveResult<Vec<Event>> {
        let expression = format!(
            "SELECT * FROM S3Object s WHERE s.timestamp >= {} AND s.timestamp <= {}",
            start, end
        );

        let mut events = Vec::new();
        for key in self.matching_chunks(namespace, start, end).await? {
            match self.select_chunk(&key, &expression).await {
                Ok(rows) => events.extend(rows),
                Err(ArchiveError::ObjectStore(ObjectStoreError::ObjectNotFound { .. })) => {}
                Err(e) => {
                    tracing::warn!("Select on {} failed, reading whole chunk: {}", key, e);
                    events.extend(
                        self.read_chunk(&key)
                            .await?
                            .into_iter()
                            .filter(|e| e.timestamp_millis >= start && e.timestamp_millis <= end),
                    );
                }
            }
        }

        let mut events = dedup_events(events);
        events.sort_by_key(|e| e.timestamp_millis);
        Ok(events)
    }

    async fn select_chunk(&self, key: &str, expression: &str) -> ArchiveResult<Vec<Event>> {
        let mut rows = self
            .client
            .select_query(&self.config.bucket, key, SelectFormat::Json, expression)
            .await?;

        let mut events = Vec::new();
        while let Some(row) = rows.try_next().await? {
            if let Some(value) = row.into_json() {
                events.push(codec::record_from_json(value)?);
            }
        }
        Ok(events)
    }

    fn concurrency(&self) -> usize {
        self.config.max_concurrency.max(1)
    }
}

#[async_trait]
impl EventsArchiver for ChunkArchiver {
    async fn has_archives(&self, namespace: &str, start: i64, end: i64) -> ArchiveResult<bool> {
        Ok(!self.matching_chunks(namespace, start, end).await?.is_empty())
    }

    async fn archive(
        &self,
        source: &dyn EventStore,
        namespace: &str,
        start: i64,
        end: i64,
        metadata_query: Option<&BTreeMap<String, String>>,
        dimensions_query: Option<&BTreeMap<String, String>>,
    ) -> ArchiveResult<ArchiveReport> {
        let started = Instant::now();
        let matcher = EventMatcher::compile(metadata_query, dimensions_query)?;

        let events = if source.supports_filtering() {
            let query = EventQuery::range(start, end)
                .with_payloads()
                .metadata_query(metadata_query.cloned())
                .dimensions_query(dimensions_query.cloned());
            source.get(namespace, &query).await?
        } else {
            source
                .get(namespace, &EventQuery::range(start, end).with_payloads())
                .await?
                .into_iter()
                .filter(|e| matcher.matches(e))
                .collect()
        };

        let mut report = ArchiveReport {
            events_read: events.len(),
            ..Default::default()
        };

        let mut windows: BTreeMap<i64, Vec<Event>> = BTreeMap::new();
        for event in events {
            windows
                .entry(self.index.floor(event.timestamp_millis))
                .or_default()
                .push(event);
        }

        let mut writes = stream::iter(windows.into_iter().map(|(window_start, events)| {
            let window = self.index.window(window_start);
            let key = self.index.archive_key(namespace, window.start);
            async move {
                let outcome = self.write_window(namespace, &key, window, events).await;
                (key, outcome)
            }
        }))
        .buffer_unordered(self.concurrency());

        let mut completed = Vec::new();
        while let Some((key, outcome)) = writes.next().await {
            match outcome {
                Ok(WriteOutcome::Written) => report.chunks_written += 1,
                Ok(WriteOutcome::Unchanged) => report.chunks_unchanged += 1,
                Err(source) => {
                    tracing::error!("Archiving {} failed on {}: {}", namespace, key, source);
                    return Err(ArchiveError::ChunkFailed {
                        key,
                        completed,
                        source: Box::new(source),
                    });
                }
            }
            completed.push(key);
        }

        tracing::info!(
            "Archived {} events of {} in [{}, {}]: {} chunks written, {} unchanged in {}ms",
            report.events_read,
            namespace,
            start,
            end,
            report.chunks_written,
            report.chunks_unchanged,
            started.elapsed().as_millis()
        );
        Ok(report)
    }

    async fn restore(
        &self,
        destination: &dyn EventStore,
        namespace: &str,
        start: i64,
        end: i64,
    ) -> ArchiveResult<RestoreReport> {
        let started = Instant::now();
        let keys = self.matching_chunks(namespace, start, end).await?;

        let mut reads = stream::iter(keys.into_iter().map(|key| async move {
            let events = self.read_chunk(&key).await;
            (key, events)
        }))
        .buffer_unordered(self.concurrency());

        let mut report = RestoreReport::default();
        let mut completed = Vec::new();
        while let Some((key, events)) = reads.next().await {
            let stored = match events {
                Ok(events) if events.is_empty() => Ok(0),
                Ok(events) => {
                    let count = events.len();
                    destination
                        .store(namespace, events)
                        .await
                        .map(|_| count)
                        .map_err(ArchiveError::from)
                }
                Err(e) => Err(e),
            };

            match stored {
                Ok(count) => {
                    report.chunks_restored += 1;
                    report.events_restored += count;
                    completed.push(key);
                }
                Err(source) => {
                    tracing::error!("Restoring {} failed on {}: {}", namespace, key, source);
                    return Err(ArchiveError::ChunkFailed {
                        key,
                        completed,
                        source: Box::new(source),
                    });
                }
            }
        }

        tracing::info!(
            "Restored {} events of {} from {} chunks in {}ms",
            report.events_restored,
            namespace,
            report.chunks_restored,
            started.elapsed().as_millis()
        );
        Ok(report)
    }

    async fn read_archives(&self, namespace: &str, start: i64, end: i64) -> ArchiveResult<Vec<Event>> {
        match self.config.cold_reads {
            ColdReadMode::Select if self.config.compression == ChunkCompression::None => {
                self.select_events(namespace, start, end).await
            }
            _ => read_by_restore(self, namespace, start, end).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventStoreResult;
    use crate::objects::{
        BlobStore, GetResult, ListPage, MemoryBlobStore, ObjectMeta, ObjectStoreClientConfig,
        ObjectStoreResult, PutOptions,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const HOUR: i64 = 3_600_000;

    /// Blob store that can lose races and fail writes on demand
    struct FlakyStore {
        inner: MemoryBlobStore,
        /// Conditional puts that first see a competing write
        races: AtomicU32,
        /// Puts to keys containing this fail with an I/O error
        fail_puts_containing: Option<String>,
        /// Gets stall this long before answering
        get_delay: Option<std::time::Duration>,
    }

    impl FlakyStore {
        fn new(races: u32, fail_puts_containing: Option<&str>) -> Self {
            Self {
                inner: MemoryBlobStore::new(),
                races: AtomicU32::new(races),
                fail_puts_containing: fail_puts_containing.map(str::to_string),
                get_delay: None,
            }
        }
    }

    #[async_trait]
    impl BlobStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
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
            if let Some(delay) = self.get_delay {
                tokio::time::sleep(delay).await;
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
            if let Some(fragment) = &self.fail_puts_containing {
                if key.contains(fragment.as_str()) {
                    return Err(ObjectStoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "injected",
                    )));
                }
            }
            let raced = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if raced {
                let competitor = Event::new(window_start_of(key)).metadata("writer", "competitor");
                let body = codec::encode_chunk(&[competitor], ChunkCompression::None).unwrap();
                self.inner
                    .put(bucket, key, Bytes::from(body), PutOptions::default())
                    .await?;
            }
            self.inner.put(bucket, key, body, options).await
        }
        async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
            self.inner.delete(bucket, key).await
        }
    }

    fn window_start_of(key: &str) -> i64 {
        let bounds = key.rsplit('/').next().unwrap();
        bounds.split('_').next().unwrap().parse().unwrap()
    }

    /// Event store that ignores filters in `get`
    struct UnfilteredStore {
        inner: MemoryEventStore,
    }

    #[async_trait]
    impl EventStore for UnfilteredStore {
        async fn namespaces(&self) -> EventStoreResult<Vec<String>> {
            self.inner.namespaces().await
        }
        async fn create(&self, namespace: &str) -> EventStoreResult<()> {
            self.inner.create(namespace).await
        }
        async fn drop_namespace(&self, namespace: &str) -> EventStoreResult<()> {
            self.inner.drop_namespace(namespace).await
        }
        async fn store(&self, namespace: &str, batch: Vec<Event>) -> EventStoreResult<()> {
            self.inner.store(namespace, batch).await
        }
        async fn get(&self, namespace: &str, query: &EventQuery) -> EventStoreResult<Vec<Event>> {
            let unfiltered = query.clone().metadata_query(None).dimensions_query(None);
            self.inner.get(namespace, &unfiltered).await
        }
        async fn expire(&self, namespace: &str, end: i64) -> EventStoreResult<()> {
            self.inner.expire(namespace, end).await
        }
        fn supports_filtering(&self) -> bool {
            false
        }
    }

    async fn archiver_on(store: Arc<dyn BlobStore>, config: ArchiverConfig) -> ChunkArchiver {
        let client = ObjectStoreClient::new(store, ObjectStoreClientConfig::default());
        ChunkArchiver::new(client, config).await.unwrap()
    }

    async fn memory_archiver() -> ChunkArchiver {
        archiver_on(Arc::new(MemoryBlobStore::new()), ArchiverConfig::default()).await
    }

    async fn sorted_get(store: &dyn EventStore, namespace: &str) -> Vec<Event> {
        store
            .get(namespace, &EventQuery::all().with_payloads())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ns1_scenario() {
        let archiver = memory_archiver().await;
        let hot = MemoryEventStore::new();
        let events = vec![
            Event::new(0).metadata("k", "v"),
            Event::new(3_600_001).dimension("d", 1.5).payload(b"p".to_vec()),
        ];
        hot.store("ns1", events.clone()).await.unwrap();

        let report = archiver.archive_all_before(&hot, "ns1", 3_600_002).await.unwrap();
        assert_eq!(report.events_read, 2);
        assert_eq!(report.chunks_written, 2);

        let keys = archiver.chunk_keys("ns1").await.unwrap();
        let windows: Vec<Window> = keys
            .iter()
            .map(|k| archiver.index().parse_key("ns1", k).unwrap())
            .collect();
        assert_eq!(
            windows,
            vec![
                Window { start: 0, end: HOUR },
                Window { start: HOUR, end: 2 * HOUR }
            ]
        );
        assert!(archiver.has_archives("ns1", 0, 7_200_000).await.unwrap());
        assert!(!archiver.has_archives("ns1", 2 * HOUR, 3 * HOUR).await.unwrap());
        assert!(!archiver.has_archives("other", 0, 7_200_000).await.unwrap());

        // Archiving leaves the source untouched
        assert_eq!(hot.event_count().await, 2);

        let destination = MemoryEventStore::new();
        let restored = archiver.restore(&destination, "ns1", 0, 7_200_000).await.unwrap();
        assert_eq!(restored, RestoreReport { chunks_restored: 2, events_restored: 2 });
        assert_eq!(sorted_get(&destination, "ns1").await, events);
    }

    #[tokio::test]
    async fn test_restore_is_superset_of_archived_range() {
        let archiver = memory_archiver().await;
        let hot = MemoryEventStore::new();
        let events: Vec<Event> = (0..50)
            .map(|i| Event::new(i * 600_000).metadata("i", i.to_string()))
            .collect();
        hot.store("ns", events.clone()).await.unwrap();

        let (start, end) = (HOUR + 1, 3 * HOUR);
        archiver.archive(&hot, "ns", start, end, None, None).await.unwrap();

        let destination = MemoryEventStore::new();
        archiver.restore(&destination, "ns", start, end).await.unwrap();
        let restored = sorted_get(&destination, "ns").await;
        for event in events.iter().filter(|e| e.timestamp_millis >= start && e.timestamp_millis <= end) {
            assert!(restored.contains(event), "missing {:?}", event);
        }
    }

    #[tokio::test]
    async fn test_archive_pushes_filters_down() {
        let archiver = memory_archiver().await;
        let hot = MemoryEventStore::new();
        hot.store(
            "ns",
            vec![
                Event::new(1).metadata("host", "prod-east-1").dimension("cpu", 0.9),
                Event::new(2).metadata("host", "dev-east-1").dimension("cpu", 0.9),
                Event::new(3).metadata("host", "prod-west-1").dimension("cpu", 0.1),
            ],
        )
        .await
        .unwrap();

        let md = BTreeMap::from([("host".to_string(), "~prod-*".to_string())]);
        let dims = BTreeMap::from([("cpu".to_string(), ">=0.5".to_string())]);
        let report = archiver
            .archive(&hot, "ns", 0, 10, Some(&md), Some(&dims))
            .await
            .unwrap();
        assert_eq!(report.events_read, 1);

        let archived = archiver.read_archives("ns", 0, 10).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].timestamp_millis, 1);
    }

    #[tokio::test]
    async fn test_archive_filters_for_non_filtering_source() {
        let archiver = memory_archiver().await;
        let source = UnfilteredStore {
            inner: MemoryEventStore::new(),
        };
        source
            .store(
                "ns",
                vec![
                    Event::new(1).metadata("host", "prod-1"),
                    Event::new(2).metadata("host", "dev-1"),
                ],
            )
            .await
            .unwrap();

        let md = BTreeMap::from([("host".to_string(), "~prod-*".to_string())]);
        let report = archiver.archive(&source, "ns", 0, 10, Some(&md), None).await.unwrap();
        assert_eq!(report.events_read, 1);
        let archived = archiver.read_archives("ns", 0, 10).await.unwrap();
        assert_eq!(archived, vec![Event::new(1).metadata("host", "prod-1")]);
    }

    #[tokio::test]
    async fn test_invalid_filter_is_rejected_before_reading() {
        let archiver = memory_archiver().await;
        let hot = MemoryEventStore::new();
        let dims = BTreeMap::from([("cpu".to_string(), ">=lots".to_string())]);
        let err = archiver
            .archive(&hot, "ns", 0, 10, None, Some(&dims))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidQuery);
    }

    #[tokio::test]
    async fn test_rearchive_merges_and_skips_unchanged() {
        let store = Arc::new(MemoryBlobStore::new());
        let archiver = archiver_on(store.clone(), ArchiverConfig::default()).await;
        let hot = MemoryEventStore::new();
        hot.store("ns", vec![Event::new(10), Event::new(20)]).await.unwrap();

        let first = archiver.archive(&hot, "ns", 0, HOUR, None, None).await.unwrap();
        assert_eq!(first.chunks_written, 1);
        let key = archiver.index().archive_key("ns", 0);
        let version = store.head("tierstore", &key).await.unwrap().unwrap().version;

        let second = archiver.archive(&hot, "ns", 0, HOUR, None, None).await.unwrap();
        assert_eq!(second.chunks_written, 0);
        assert_eq!(second.chunks_unchanged, 1);
        assert_eq!(store.head("tierstore", &key).await.unwrap().unwrap().version, version);

        hot.store("ns", vec![Event::new(30)]).await.unwrap();
        let third = archiver.archive(&hot, "ns", 0, HOUR, None, None).await.unwrap();
        assert_eq!(third.chunks_written, 1);

        let meta = store.head("tierstore", &key).await.unwrap().unwrap();
        assert_eq!(meta.metadata["event-count"], "3");
        assert_eq!(meta.metadata["namespace"], "ns");
        assert_eq!(meta.metadata["window-end"], HOUR.to_string());
        assert_eq!(archiver.read_archives("ns", 0, HOUR).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_lost_race_is_retried_without_losing_events() {
        let store = Arc::new(FlakyStore::new(2, None));
        let archiver = archiver_on(store.clone(), ArchiverConfig::default()).await;
        let hot = MemoryEventStore::new();
        hot.store("ns", vec![Event::new(5).metadata("writer", "us")]).await.unwrap();

        let report = archiver.archive(&hot, "ns", 0, HOUR, None, None).await.unwrap();
        assert_eq!(report.chunks_written, 1);

        let archived = archiver.read_archives("ns", 0, HOUR).await.unwrap();
        assert!(archived.contains(&Event::new(5).metadata("writer", "us")));
        assert!(archived.contains(&Event::new(0).metadata("writer", "competitor")));
    }

    #[tokio::test]
    async fn test_conflict_after_retries_exhausted() {
        let store = Arc::new(FlakyStore::new(100, None));
        let config = ArchiverConfig {
            max_write_retries: 2,
            ..Default::default()
        };
        let archiver = archiver_on(store, config).await;
        let hot = MemoryEventStore::new();
        hot.store("ns", vec![Event::new(5)]).await.unwrap();

        let err = archiver.archive(&hot, "ns", 0, HOUR, None, None).await.unwrap_err();
        match err {
            ArchiveError::ChunkFailed { source, completed, .. } => {
                assert!(completed.is_empty());
                assert!(matches!(*source, ArchiveError::Conflict { attempts: 3, .. }));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_chunk_failure_reports_completed_keys() {
        let store = Arc::new(FlakyStore::new(0, Some(format!("/{}_", 2 * HOUR).as_str())));
        let config = ArchiverConfig {
            max_concurrency: 1,
            ..Default::default()
        };
        let archiver = archiver_on(store, config).await;
        let hot = MemoryEventStore::new();
        hot.store(
            "ns",
            vec![Event::new(0), Event::new(HOUR), Event::new(2 * HOUR), Event::new(3 * HOUR)],
        )
        .await
        .unwrap();

        let err = archiver.archive_all_before(&hot, "ns", 4 * HOUR).await.unwrap_err();
        let ArchiveError::ChunkFailed { key, completed, source } = err else {
            panic!("expected a chunk failure");
        };
        assert_eq!(key, archiver.index().archive_key("ns", 2 * HOUR));
        assert_eq!(
            completed,
            vec![
                archiver.index().archive_key("ns", 0),
                archiver.index().archive_key("ns", HOUR)
            ]
        );
        assert_eq!(source.kind(), crate::error::ErrorKind::IoFailure);
        assert_eq!(hot.event_count().await, 4);
    }

    #[tokio::test]
    async fn test_slow_backend_fails_the_chunk() {
        let store = Arc::new(FlakyStore {
            get_delay: Some(std::time::Duration::from_millis(500)),
            ..FlakyStore::new(0, None)
        });
        let client = ObjectStoreClient::new(
            store,
            ObjectStoreClientConfig {
                request_timeout: std::time::Duration::from_millis(20),
                ..Default::default()
            },
        );
        let archiver = ChunkArchiver::new(client, ArchiverConfig::default()).await.unwrap();
        let hot = MemoryEventStore::new();
        hot.store("ns", vec![Event::new(0)]).await.unwrap();

        let err = archiver.archive_all_before(&hot, "ns", HOUR).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IoFailure);
        let ArchiveError::ChunkFailed { key, completed, source } = err else {
            panic!("expected a chunk failure");
        };
        assert_eq!(key, archiver.index().archive_key("ns", 0));
        assert!(completed.is_empty());
        assert!(matches!(
            *source,
            ArchiveError::ObjectStore(ObjectStoreError::Timeout { .. })
        ));
        assert_eq!(hot.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_last_window_holds_max_timestamp() {
        let archiver = memory_archiver().await;
        let hot = MemoryEventStore::new();
        let last = Event::new(i64::MAX).metadata("k", "last");
        hot.store("ns", vec![last.clone()]).await.unwrap();

        archiver.archive(&hot, "ns", i64::MAX, i64::MAX, None, None).await.unwrap();
        assert!(archiver.has_archives("ns", i64::MAX, i64::MAX).await.unwrap());

        let destination = MemoryEventStore::new();
        let report = archiver.restore(&destination, "ns", i64::MAX, i64::MAX).await.unwrap();
        assert_eq!(report, RestoreReport { chunks_restored: 1, events_restored: 1 });
        assert_eq!(sorted_get(&destination, "ns").await, vec![last]);
    }

    #[tokio::test]
    async fn test_restore_dedups_within_chunk() {
        let store = Arc::new(MemoryBlobStore::new());
        let archiver = archiver_on(store.clone(), ArchiverConfig::default()).await;
        let key = archiver.index().archive_key("ns", 0);
        let body = codec::encode_chunk(&[Event::new(1), Event::new(1)], ChunkCompression::None).unwrap();
        store
            .put("tierstore", &key, Bytes::from(body), PutOptions::default())
            .await
            .unwrap();

        let destination = MemoryEventStore::new();
        let report = archiver.restore(&destination, "ns", 0, 10).await.unwrap();
        assert_eq!(report.events_restored, 1);
    }

    #[tokio::test]
    async fn test_restore_aborts_on_corrupt_chunk() {
        let store = Arc::new(MemoryBlobStore::new());
        let archiver = archiver_on(store.clone(), ArchiverConfig::default()).await;
        let key = archiver.index().archive_key("ns", 0);
        store
            .put("tierstore", &key, Bytes::from_static(b"TSZ4garbage"), PutOptions::default())
            .await
            .unwrap();

        let destination = MemoryEventStore::new();
        let err = archiver.restore(&destination, "ns", 0, 10).await.unwrap_err();
        assert!(matches!(err, ArchiveError::ChunkFailed { ref key, .. } if key.ends_with("0_3600000")));
        assert_eq!(err.kind(), crate::error::ErrorKind::Serialization);
    }

    #[tokio::test]
    async fn test_lz4_chunks_round_trip() {
        let config = ArchiverConfig {
            compression: ChunkCompression::Lz4,
            ..Default::default()
        };
        let archiver = archiver_on(Arc::new(MemoryBlobStore::new()), config).await;
        let hot = MemoryEventStore::new();
        let events = vec![Event::new(1).payload(vec![1, 2, 3]), Event::new(HOUR + 1)];
        hot.store("ns", events.clone()).await.unwrap();

        archiver.archive(&hot, "ns", 0, 2 * HOUR, None, None).await.unwrap();
        assert_eq!(archiver.read_archives("ns", 0, 2 * HOUR).await.unwrap(), events);
    }

    #[tokio::test]
    async fn test_select_reads_narrow_to_range() {
        let config = ArchiverConfig {
            cold_reads: ColdReadMode::Select,
            ..Default::default()
        };
        let archiver = archiver_on(Arc::new(MemoryBlobStore::new()), config).await;
        let hot = MemoryEventStore::new();
        let events: Vec<Event> = (0..10)
            .map(|i| Event::new(i * 1000).dimension("v", i as f64).payload(vec![i as u8]))
            .collect();
        hot.store("ns", events.clone()).await.unwrap();
        archiver.archive(&hot, "ns", 0, HOUR, None, None).await.unwrap();

        let read = archiver.read_archives("ns", 2000, 4000).await.unwrap();
        assert_eq!(read, events[2..=4].to_vec());
    }

    #[tokio::test]
    async fn test_select_falls_back_for_compressed_chunks() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = archiver_on(
            store.clone(),
            ArchiverConfig {
                compression: ChunkCompression::Lz4,
                ..Default::default()
            },
        )
        .await;
        let hot = MemoryEventStore::new();
        hot.store("ns", vec![Event::new(1), Event::new(2)]).await.unwrap();
        writer.archive(&hot, "ns", 0, 10, None, None).await.unwrap();

        let reader = archiver_on(store, ArchiverConfig::default()).await;
        assert_eq!(reader.select_events("ns", 2, 2).await.unwrap(), vec![Event::new(2)]);
    }
}
