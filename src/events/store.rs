//! The event store abstraction
//!
//! Hot stores, the tiered facade and any archiver source or restore
//! destination all implement [`EventStore`].

use super::error::EventStoreResult;
use super::types::{Event, EventQuery};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Namespaced, time-indexed event storage
#[async_trait]
pub trait EventStore: Send + Sync {
    /// List known namespaces
    async fn namespaces(&self) -> EventStoreResult<Vec<String>>;

    /// Create a namespace; creating an existing one is a no-op
    async fn create(&self, namespace: &str) -> EventStoreResult<()>;

    /// Remove a namespace and every event in it
    async fn drop_namespace(&self, namespace: &str) -> EventStoreResult<()>;

    /// Append a batch of events, creating the namespace if needed
    async fn store(&self, namespace: &str, batch: Vec<Event>) -> EventStoreResult<()>;

    /// Events in `[query.start, query.end]` matching the query filters
    ///
    /// Unknown namespaces read as empty.
    async fn get(&self, namespace: &str, query: &EventQuery) -> EventStoreResult<Vec<Event>>;

    /// Delete every event with a timestamp before `end_timestamp_millis`
    async fn expire(&self, namespace: &str, end_timestamp_millis: i64) -> EventStoreResult<()>;

    /// Whether `get` applies metadata and dimension filters itself
    ///
    /// Archivers push filters down to sources that do, and filter in memory
    /// for sources that don't.
    fn supports_filtering(&self) -> bool {
        true
    }

    /// Distinct values of one metadata key across matching events
    async fn metadata(
        &self,
        namespace: &str,
        metadata_key: &str,
        query: &EventQuery,
    ) -> EventStoreResult<BTreeSet<String>> {
        let query = query.clone().include_payloads(false).limit(0);
        let events = self.get(namespace, &query).await?;
        Ok(events
            .into_iter()
            .filter_map(|mut e| e.metadata.remove(metadata_key))
            .collect())
    }

    /// Matching events carrying one dimension, projected to that dimension
    async fn dimension(
        &self,
        namespace: &str,
        dimension_key: &str,
        query: &EventQuery,
    ) -> EventStoreResult<Vec<Event>> {
        let events = self.get(namespace, &query.clone().include_payloads(false)).await?;
        Ok(events
            .into_iter()
            .filter_map(|e| {
                e.dimensions
                    .get(dimension_key)
                    .map(|value| Event::new(e.timestamp_millis).dimension(dimension_key, *value))
            })
            .collect())
    }
}
