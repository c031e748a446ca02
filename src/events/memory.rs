//! In-memory hot store
//!
//! [`NamespaceIndex`] keeps each namespace as a timestamp-ordered map so range
//! reads and expiry are tree walks. [`MemoryEventStore`] wraps it behind an
//! async lock; the log-backed store reuses the same index.

use super::error::{EventStoreError, EventStoreResult};
use super::store::EventStore;
use super::types::{Event, EventQuery};
use crate::query::EventMatcher;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Reject namespaces that cannot be addressed
pub(crate) fn validate_namespace(namespace: &str) -> EventStoreResult<()> {
    if namespace.trim().is_empty() {
        return Err(EventStoreError::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}

/// Events of every namespace, ordered by timestamp
#[derive(Debug, Default)]
pub(crate) struct NamespaceIndex {
    namespaces: HashMap<String, BTreeMap<i64, Vec<Event>>>,
}

impl NamespaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create(&mut self, namespace: &str) {
        self.namespaces.entry(namespace.to_string()).or_default();
    }

    pub fn drop_namespace(&mut self, namespace: &str) -> bool {
        self.namespaces.remove(namespace).is_some()
    }

    pub fn insert(&mut self, namespace: &str, events: Vec<Event>) {
        let series = self.namespaces.entry(namespace.to_string()).or_default();
        for event in events {
            series.entry(event.timestamp_millis).or_default().push(event);
        }
    }

    /// Remove events before `end`, returning how many were dropped
    pub fn expire(&mut self, namespace: &str, end: i64) -> usize {
        let Some(series) = self.namespaces.get_mut(namespace) else {
            return 0;
        };
        let kept = series.split_off(&end);
        let removed = series.values().map(Vec::len).sum();
        *series = kept;
        removed
    }

    pub fn query(&self, namespace: &str, query: &EventQuery, matcher: &EventMatcher) -> Vec<Event> {
        let Some(series) = self.namespaces.get(namespace) else {
            return Vec::new();
        };
        if query.start > query.end {
            return Vec::new();
        }

        let range = series.range(query.start..=query.end);
        let candidates: Box<dyn Iterator<Item = &Event> + '_> = if query.ascending {
            Box::new(range.flat_map(|(_, events)| events.iter()))
        } else {
            Box::new(range.rev().flat_map(|(_, events)| events.iter()))
        };

        let selected = candidates.filter(|event| matcher.matches(event)).map(|event| {
            if query.include_payloads {
                event.clone()
            } else {
                event.without_payload()
            }
        });

        if query.limit > 0 {
            selected.take(query.limit).collect()
        } else {
            selected.collect()
        }
    }

    /// All events of one namespace in timestamp order
    pub fn events(&self, namespace: &str) -> Vec<Event> {
        self.namespaces
            .get(namespace)
            .map(|series| series.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.namespaces
            .values()
            .flat_map(|series| series.values())
            .map(Vec::len)
            .sum()
    }
}

/// Hot store that keeps everything in memory
///
/// Used as the scratch destination for cold reads and in tests.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    index: RwLock<NamespaceIndex>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(NamespaceIndex::new()),
        }
    }

    /// Total number of events across all namespaces
    pub async fn event_count(&self) -> usize {
        self.index.read().await.event_count()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn namespaces(&self) -> EventStoreResult<Vec<String>> {
        Ok(self.index.read().await.namespaces())
    }

    async fn create(&self, namespace: &str) -> EventStoreResult<()> {
        validate_namespace(namespace)?;
        self.index.write().await.create(namespace);
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> EventStoreResult<()> {
        self.index.write().await.drop_namespace(namespace);
        Ok(())
    }

    async fn store(&self, namespace: &str, batch: Vec<Event>) -> EventStoreResult<()> {
        validate_namespace(namespace)?;
        self.index.write().await.insert(namespace, batch);
        Ok(())
    }

    async fn get(&self, namespace: &str, query: &EventQuery) -> EventStoreResult<Vec<Event>> {
        let matcher = EventMatcher::for_query(query)?;
        Ok(self.index.read().await.query(namespace, query, &matcher))
    }

    async fn expire(&self, namespace: &str, end_timestamp_millis: i64) -> EventStoreResult<()> {
        let removed = self
            .index
            .write()
            .await
            .expire(namespace, end_timestamp_millis);
        tracing::debug!("Expired {} events from {} before {}", removed, namespace, end_timestamp_millis);
        Ok(())
    }
}
