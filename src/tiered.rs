//! Hot and cold tiers behind one event store
//!
//! Writes land in the hot tier only. Reads consult the cold tier whenever a
//! chunk overlaps the requested range, and expiry archives before it deletes.

use crate::archive::EventsArchiver;
use crate::events::{dedup_events, Event, EventQuery, EventStore, EventStoreResult};
use crate::query::EventMatcher;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// An [`EventStore`] that spills expired events to an archiver
pub struct TieredEventStore {
    hot: Arc<dyn EventStore>,
    archiver: Arc<dyn EventsArchiver>,
}

impl TieredEventStore {
    pub fn new(hot: Arc<dyn EventStore>, archiver: Arc<dyn EventsArchiver>) -> Self {
        Self { hot, archiver }
    }

    pub fn hot(&self) -> &Arc<dyn EventStore> {
        &self.hot
    }

    pub fn archiver(&self) -> &Arc<dyn EventsArchiver> {
        &self.archiver
    }
}

#[async_trait]
impl EventStore for TieredEventStore {
    async fn namespaces(&self) -> EventStoreResult<Vec<String>> {
        self.hot.namespaces().await
    }

    async fn create(&self, namespace: &str) -> EventStoreResult<()> {
        self.hot.create(namespace).await
    }

    /// Drops the hot namespace; archived chunks are kept
    async fn drop_namespace(&self, namespace: &str) -> EventStoreResult<()> {
        self.hot.drop_namespace(namespace).await
    }

    async fn store(&self, namespace: &str, batch: Vec<Event>) -> EventStoreResult<()> {
        self.hot.store(namespace, batch).await
    }

    async fn get(&self, namespace: &str, query: &EventQuery) -> EventStoreResult<Vec<Event>> {
        let matcher = EventMatcher::for_query(query)?;

        // Ordering and limit apply to the merged result
        let mut events = self.hot.get(namespace, &query.clone().limit(0)).await?;

        if self
            .archiver
            .has_archives(namespace, query.start, query.end)
            .await?
        {
            let started = Instant::now();
            let cold = self
                .archiver
                .read_archives(namespace, query.start, query.end)
                .await?;
            let cold: Vec<Event> = cold
                .into_iter()
                .filter(|e| query.contains(e.timestamp_millis) && matcher.matches(e))
                .map(|e| {
                    if query.include_payloads {
                        e
                    } else {
                        e.without_payload()
                    }
                })
                .collect();
            tracing::debug!(
                "Merging {} hot and {} cold events of {} (cold read {}ms)",
                events.len(),
                cold.len(),
                namespace,
                started.elapsed().as_millis()
            );
            events.extend(cold);
            events = dedup_events(events);
        }

        Ok(query.order_and_limit(events))
    }

    /// Archive everything before `end_timestamp_millis`, then delete it
    ///
    /// Deletion only runs once archiving succeeded, so a failed or
    /// interrupted expire leaves the hot tier intact and can be retried.
    async fn expire(&self, namespace: &str, end_timestamp_millis: i64) -> EventStoreResult<()> {
        let started = Instant::now();
        let report = self
            .archiver
            .archive_all_before(self.hot.as_ref(), namespace, end_timestamp_millis)
            .await?;
        self.hot.expire(namespace, end_timestamp_millis).await?;

        tracing::info!(
            "Expired {} before {}: {} events archived ({} chunks written) in {}ms",
            namespace,
            end_timestamp_millis,
            report.events_read,
            report.chunks_written,
            started.elapsed().as_millis()
        );
        Ok(())
    }
}
