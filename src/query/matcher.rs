//! Event filter evaluation
//!
//! A metadata query maps a key to a pattern:
//! - `=value` matches exactly `value`
//! - `~pat*` is a wildcard where `*` matches any run of characters
//! - anything else matches exactly
//!
//! A dimension query maps a key to a predicate: `<=`, `>=`, `<`, `>`, `=` or
//! a bare number (equality), followed by a decimal value.
//!
//! Every entry must hold for an event to match; a key missing from the event
//! never matches. Queries are compiled once so repeated evaluation never
//! fails.

use super::error::{QueryError, QueryResult};
use super::pattern::wildcard_regex;
use crate::events::{Event, EventQuery};
use regex::Regex;
use std::collections::BTreeMap;

/// A compiled metadata pattern
#[derive(Debug, Clone)]
pub enum MetadataPredicate {
    /// Value must equal the string
    Exact(String),
    /// Value must match the anchored wildcard
    Wildcard(Regex),
}

impl MetadataPredicate {
    /// Compile one metadata pattern
    pub fn parse(key: &str, pattern: &str) -> QueryResult<Self> {
        if key.is_empty() {
            return Err(QueryError::InvalidMetadataQuery {
                key: key.to_string(),
                reason: "empty key".to_string(),
            });
        }
        if let Some(exact) = pattern.strip_prefix('=') {
            return Ok(MetadataPredicate::Exact(exact.to_string()));
        }
        if let Some(wildcard) = pattern.strip_prefix('~') {
            let regex = wildcard_regex(wildcard).map_err(|e| QueryError::InvalidMetadataQuery {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(MetadataPredicate::Wildcard(regex));
        }
        Ok(MetadataPredicate::Exact(pattern.to_string()))
    }

    /// Test a metadata value
    pub fn matches(&self, value: &str) -> bool {
        match self {
            MetadataPredicate::Exact(expected) => value == expected,
            MetadataPredicate::Wildcard(regex) => regex.is_match(value),
        }
    }
}

/// Comparison applied to a dimension value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparator {
    /// Apply `lhs <op> rhs` with IEEE semantics
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Eq => lhs == rhs,
            Comparator::Lt => lhs < rhs,
            Comparator::Lte => lhs <= rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Gte => lhs >= rhs,
        }
    }
}

/// A compiled dimension predicate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionPredicate {
    pub comparator: Comparator,
    pub value: f64,
}

impl DimensionPredicate {
    /// Compile one dimension predicate
    pub fn parse(key: &str, predicate: &str) -> QueryResult<Self> {
        let invalid = |reason: String| QueryError::InvalidDimensionQuery {
            key: key.to_string(),
            reason,
        };
        if key.is_empty() {
            return Err(invalid("empty key".to_string()));
        }

        let trimmed = predicate.trim();
        // Two-character operators first so "<=" is not read as "<" then "=1"
        let (comparator, operand) = if let Some(rest) = trimmed.strip_prefix("<=") {
            (Comparator::Lte, rest)
        } else if let Some(rest) = trimmed.strip_prefix(">=") {
            (Comparator::Gte, rest)
        } else if let Some(rest) = trimmed.strip_prefix('<') {
            (Comparator::Lt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            (Comparator::Gt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            (Comparator::Eq, rest)
        } else {
            (Comparator::Eq, trimmed)
        };

        let operand = operand.trim();
        let value = operand
            .parse::<f64>()
            .map_err(|_| invalid(format!("'{}' is not a number", operand)))?;

        Ok(Self { comparator, value })
    }

    /// Test a dimension value
    pub fn matches(&self, value: f64) -> bool {
        self.comparator.compare(value, self.value)
    }
}

/// Compiled metadata and dimension filters
#[derive(Debug, Clone, Default)]
pub struct EventMatcher {
    metadata: Vec<(String, MetadataPredicate)>,
    dimensions: Vec<(String, DimensionPredicate)>,
}

impl EventMatcher {
    /// Compile both filter maps; absent or empty maps match everything
    pub fn compile(
        metadata_query: Option<&BTreeMap<String, String>>,
        dimensions_query: Option<&BTreeMap<String, String>>,
    ) -> QueryResult<Self> {
        let metadata = metadata_query
            .into_iter()
            .flatten()
            .map(|(key, pattern)| Ok((key.clone(), MetadataPredicate::parse(key, pattern)?)))
            .collect::<QueryResult<Vec<_>>>()?;

        let dimensions = dimensions_query
            .into_iter()
            .flatten()
            .map(|(key, predicate)| Ok((key.clone(), DimensionPredicate::parse(key, predicate)?)))
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(Self {
            metadata,
            dimensions,
        })
    }

    /// Compile the filters carried by a query
    pub fn for_query(query: &EventQuery) -> QueryResult<Self> {
        Self::compile(
            query.metadata_query.as_ref(),
            query.dimensions_query.as_ref(),
        )
    }

    /// True when no filter entries were given
    pub fn is_unconditional(&self) -> bool {
        self.metadata.is_empty() && self.dimensions.is_empty()
    }

    /// Evaluate against one event
    pub fn matches(&self, event: &Event) -> bool {
        let metadata_ok = self.metadata.iter().all(|(key, predicate)| {
            event
                .metadata
                .get(key)
                .map(|value| predicate.matches(value))
                .unwrap_or(false)
        });

        metadata_ok
            && self.dimensions.iter().all(|(key, predicate)| {
                event
                    .dimensions
                    .get(key)
                    .map(|value| predicate.matches(*value))
                    .unwrap_or(false)
            })
    }
}

/// Compile and evaluate in one step
pub fn matches(
    event: &Event,
    metadata_query: Option<&BTreeMap<String, String>>,
    dimensions_query: Option<&BTreeMap<String, String>>,
) -> QueryResult<bool> {
    Ok(EventMatcher::compile(metadata_query, dimensions_query)?.matches(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_cpu_and_host_filter() {
        let event = Event::new(1).metadata("host", "h1").dimension("cpu", 0.9);
        let dims = query(&[("cpu", ">0.5")]);
        let md = query(&[("host", "~h*")]);
        assert!(matches(&event, Some(&md), Some(&dims)).unwrap());

        let dims = query(&[("cpu", "<0.5")]);
        assert!(!matches(&event, Some(&md), Some(&dims)).unwrap());
    }

    #[test]
    fn test_absent_queries_match_everything() {
        let event = Event::new(1);
        assert!(matches(&event, None, None).unwrap());
        assert!(matches(&event, Some(&BTreeMap::new()), Some(&BTreeMap::new())).unwrap());
        assert!(EventMatcher::compile(None, None).unwrap().is_unconditional());
    }

    #[test]
    fn test_missing_keys_never_match() {
        let event = Event::new(1).metadata("host", "h1").dimension("cpu", 0.9);
        let md = query(&[("region", "~*")]);
        assert!(!matches(&event, Some(&md), None).unwrap());

        let dims = query(&[("mem", ">=0")]);
        assert!(!matches(&event, None, Some(&dims)).unwrap());
    }

    #[test]
    fn test_metadata_exact_forms() {
        let event = Event::new(1).metadata("env", "prod");
        assert!(matches(&event, Some(&query(&[("env", "prod")])), None).unwrap());
        assert!(matches(&event, Some(&query(&[("env", "=prod")])), None).unwrap());
        assert!(!matches(&event, Some(&query(&[("env", "pro")])), None).unwrap());

        // "=" forces exact even for values that look like wildcards
        let starred = Event::new(1).metadata("env", "~p*");
        assert!(matches(&starred, Some(&query(&[("env", "=~p*")])), None).unwrap());
        assert!(!matches(&event, Some(&query(&[("env", "=~p*")])), None).unwrap());
    }

    #[test]
    fn test_metadata_wildcard_is_anchored() {
        let event = Event::new(1).metadata("host", "web-01.dc1");
        assert!(matches(&event, Some(&query(&[("host", "~web-*")])), None).unwrap());
        assert!(matches(&event, Some(&query(&[("host", "~*.dc1")])), None).unwrap());
        assert!(!matches(&event, Some(&query(&[("host", "~eb-*")])), None).unwrap());
        // "." is literal, not a regex wildcard
        assert!(!matches(&event, Some(&query(&[("host", "~web-01xdc1")])), None).unwrap());
    }

    #[test]
    fn test_dimension_operators() {
        let event = Event::new(1).dimension("v", 10.0);
        let check = |predicate: &str| matches(&event, None, Some(&query(&[("v", predicate)]))).unwrap();

        assert!(check("10"));
        assert!(check("=10"));
        assert!(check("<=10"));
        assert!(check(">=10"));
        assert!(check("<10.5"));
        assert!(check(">9.99"));
        assert!(check(" >= 1e1 "));
        assert!(!check("<10"));
        assert!(!check(">10"));
        assert!(!check("=11"));
    }

    #[test]
    fn test_nan_dimension_never_compares() {
        let event = Event::new(1).dimension("v", f64::NAN);
        for predicate in ["=0", "<0", ">0", "<=0", ">=0"] {
            assert!(!matches(&event, None, Some(&query(&[("v", predicate)]))).unwrap());
        }
    }

    #[test]
    fn test_malformed_dimension_is_invalid_query() {
        let event = Event::new(1).dimension("v", 1.0);
        for predicate in ["abc", ">", "<=x", "", "=>1"] {
            let err = matches(&event, None, Some(&query(&[("v", predicate)]))).unwrap_err();
            assert!(matches!(err, QueryError::InvalidDimensionQuery { .. }), "{}", predicate);
        }
    }

    #[test]
    fn test_empty_keys_rejected() {
        let event = Event::new(1);
        assert!(matches(&event, Some(&query(&[("", "x")])), None).is_err());
        assert!(matches(&event, None, Some(&query(&[("", "1")]))).is_err());
    }

    #[test]
    fn test_adding_entries_only_narrows() {
        let events: Vec<Event> = (0..20)
            .map(|i| {
                Event::new(i)
                    .metadata("host", if i % 2 == 0 { "web-1" } else { "db-1" })
                    .dimension("cpu", i as f64 / 20.0)
            })
            .collect();

        let broad = EventMatcher::compile(Some(&query(&[("host", "~web-*")])), None).unwrap();
        let narrow = EventMatcher::compile(
            Some(&query(&[("host", "~web-*")])),
            Some(&query(&[("cpu", ">0.5")])),
        )
        .unwrap();

        for event in &events {
            if narrow.matches(event) {
                assert!(broad.matches(event));
            }
        }
        assert!(events.iter().filter(|e| narrow.matches(e)).count() < events.iter().filter(|e| broad.matches(e)).count());
    }
}
