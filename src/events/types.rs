//! Core data types for tierstore events
//!
//! This module defines the values that move between tiers:
//! - `Event`: a single timestamped record with metadata, dimensions and payload
//! - `EventQuery`: the range, filter, ordering and limit of a read

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};

/// A single timestamped event
///
/// Two events are equal when all four fields are equal. Dimension values are
/// compared by their bit patterns so that equality stays an equivalence
/// relation (`NaN == NaN`, `0.0 != -0.0`) and events can live in hash sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unix timestamp in milliseconds
    pub timestamp_millis: i64,
    /// String labels used for filtering
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Numeric measurements used for filtering and projection
    #[serde(default)]
    pub dimensions: BTreeMap<String, f64>,
    /// Opaque payload, absent unless stored with one
    #[serde(default)]
    pub payload: Option<Vec<u8>>,
}

impl Event {
    /// Create an event at a specific timestamp
    pub fn new(timestamp_millis: i64) -> Self {
        Self {
            timestamp_millis,
            metadata: BTreeMap::new(),
            dimensions: BTreeMap::new(),
            payload: None,
        }
    }

    /// Create an event stamped with the current time
    pub fn now() -> Self {
        Self::new(Utc::now().timestamp_millis())
    }

    /// Builder method: add a metadata label
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builder method: add a dimension
    pub fn dimension(mut self, key: impl Into<String>, value: f64) -> Self {
        self.dimensions.insert(key.into(), value);
        self
    }

    /// Builder method: attach a payload
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Copy of this event with the payload removed
    pub fn without_payload(&self) -> Self {
        Self {
            timestamp_millis: self.timestamp_millis,
            metadata: self.metadata.clone(),
            dimensions: self.dimensions.clone(),
            payload: None,
        }
    }

    /// Get estimated size in bytes (for cache and batch sizing)
    pub fn estimated_size(&self) -> usize {
        let metadata_size: usize = self.metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
        let dimensions_size: usize = self.dimensions.keys().map(|k| k.len() + 8).sum();
        let payload_size = self.payload.as_ref().map(Vec::len).unwrap_or(0);
        8 + metadata_size + dimensions_size + payload_size
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp_millis == other.timestamp_millis
            && self.metadata == other.metadata
            && self.payload == other.payload
            && self.dimensions.len() == other.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(other.dimensions.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.timestamp_millis.hash(state);
        self.metadata.hash(state);
        self.dimensions.len().hash(state);
        for (key, value) in &self.dimensions {
            key.hash(state);
            value.to_bits().hash(state);
        }
        self.payload.hash(state);
    }
}

/// Remove repeated events, keeping the first occurrence of each
pub fn dedup_events(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::with_capacity(events.len());
    let mut unique = Vec::with_capacity(events.len());
    for event in events {
        if !seen.contains(&event) {
            seen.insert(event.clone());
            unique.push(event);
        }
    }
    unique
}

/// A read against one namespace
///
/// The time range is inclusive at both ends. A `limit` of zero means
/// unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// Inclusive lower bound in milliseconds
    pub start: i64,
    /// Inclusive upper bound in milliseconds
    pub end: i64,
    /// Metadata filters, see [`crate::query::EventMatcher`]
    pub metadata_query: Option<BTreeMap<String, String>>,
    /// Dimension filters, see [`crate::query::EventMatcher`]
    pub dimensions_query: Option<BTreeMap<String, String>>,
    /// Return payloads with the events
    pub include_payloads: bool,
    /// Sort ascending by timestamp (descending when false)
    pub ascending: bool,
    /// Maximum number of events, zero for unlimited
    pub limit: usize,
}

impl EventQuery {
    /// Query all events in `[start, end]`, ascending, without payloads
    pub fn range(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            metadata_query: None,
            dimensions_query: None,
            include_payloads: false,
            ascending: true,
            limit: 0,
        }
    }

    /// Query every timestamp
    pub fn all() -> Self {
        Self::range(i64::MIN, i64::MAX)
    }

    /// Builder method: add a metadata filter
    pub fn metadata(mut self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.metadata_query
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), pattern.into());
        self
    }

    /// Builder method: add a dimension filter
    pub fn dimension(mut self, key: impl Into<String>, predicate: impl Into<String>) -> Self {
        self.dimensions_query
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), predicate.into());
        self
    }

    /// Builder method: set the metadata filters wholesale
    pub fn metadata_query(mut self, query: Option<BTreeMap<String, String>>) -> Self {
        self.metadata_query = query;
        self
    }

    /// Builder method: set the dimension filters wholesale
    pub fn dimensions_query(mut self, query: Option<BTreeMap<String, String>>) -> Self {
        self.dimensions_query = query;
        self
    }

    /// Builder method: return payloads
    pub fn with_payloads(mut self) -> Self {
        self.include_payloads = true;
        self
    }

    /// Builder method: choose payload inclusion
    pub fn include_payloads(mut self, include: bool) -> Self {
        self.include_payloads = include;
        self
    }

    /// Builder method: newest first
    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    /// Builder method: choose the sort direction
    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    /// Builder method: cap the result size
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Check if a timestamp falls inside the query range
    pub fn contains(&self, timestamp_millis: i64) -> bool {
        timestamp_millis >= self.start && timestamp_millis <= self.end
    }

    /// Sort by timestamp in the requested direction and apply the limit
    ///
    /// The sort is stable so events sharing a timestamp keep their relative
    /// order.
    pub fn order_and_limit(&self, mut events: Vec<Event>) -> Vec<Event> {
        if self.ascending {
            events.sort_by_key(|e| e.timestamp_millis);
        } else {
            events.sort_by_key(|e| std::cmp::Reverse(e.timestamp_millis));
        }
        if self.limit > 0 {
            events.truncate(self.limit);
        }
        events
    }
}

impl Default for EventQuery {
    fn default() -> Self {
        Self::all()
    }
}
