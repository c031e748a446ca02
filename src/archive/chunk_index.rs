//! Window math and chunk naming
//!
//! Time is cut into fixed windows of `window_size_millis`. Each
//! (namespace, window) pair maps to one chunk key:
//!
//! ```text
//! {prefix}/{slug}-{crc32:08x}/{windowStart}_{windowEnd}
//! ```
//!
//! The slug keeps namespaces readable in listings; the CRC32 of the full
//! namespace keeps distinct namespaces with equal slugs apart. Windows are
//! half-open, `[windowStart, windowEnd)`, and are recovered from the key
//! alone.

use super::error::{ArchiveError, ArchiveResult};

/// Default key prefix for archived chunks
pub const DEFAULT_ARCHIVE_PREFIX: &str = "events-archive";

/// Longest namespace slug kept in a key
const MAX_SLUG_LEN: usize = 32;

/// Start of the window containing `t`
///
/// Uses Euclidean remainder so negative timestamps floor toward negative
/// infinity. `window_size_millis` must be positive.
pub fn floor(t: i64, window_size_millis: i64) -> i64 {
    t.saturating_sub(t.rem_euclid(window_size_millis))
}

/// Readable, key-safe form of a namespace
pub fn namespace_slug(namespace: &str) -> String {
    namespace
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_SLUG_LEN)
        .collect()
}

/// A half-open time window `[start, end)`
///
/// The last window's end saturates at `i64::MAX`, so that window also
/// holds `i64::MAX` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    /// Largest timestamp inside the window
    pub fn last(&self) -> i64 {
        if self.end == i64::MAX {
            i64::MAX
        } else {
            self.end - 1
        }
    }

    /// True when some timestamp lies in both this window and `[start, end]`
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        self.start <= end && self.last() >= start
    }

    pub fn contains(&self, t: i64) -> bool {
        t >= self.start && t <= self.last()
    }
}

/// Maps namespaces and timestamps to chunk keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIndex {
    prefix: String,
    window_size_millis: i64,
}

impl ChunkIndex {
    pub fn new(prefix: impl Into<String>, window_size_millis: i64) -> ArchiveResult<Self> {
        if window_size_millis <= 0 {
            return Err(ArchiveError::InvalidWindow(window_size_millis));
        }
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Ok(Self {
            prefix,
            window_size_millis,
        })
    }

    pub fn window_size_millis(&self) -> i64 {
        self.window_size_millis
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Start of the window containing `t`
    pub fn floor(&self, t: i64) -> i64 {
        floor(t, self.window_size_millis)
    }

    /// The window containing `t`
    pub fn window(&self, t: i64) -> Window {
        let start = self.floor(t);
        Window {
            start,
            end: start.saturating_add(self.window_size_millis),
        }
    }

    /// Key prefix shared by every chunk of a namespace, ending in `/`
    pub fn namespace_prefix(&self, namespace: &str) -> String {
        format!(
            "{}/{}-{:08x}/",
            self.prefix,
            namespace_slug(namespace),
            crc32fast::hash(namespace.as_bytes())
        )
    }

    /// Chunk key for the window starting at (or containing) `window_start`
    pub fn archive_key(&self, namespace: &str, window_start: i64) -> String {
        let window = self.window(window_start);
        format!(
            "{}{}_{}",
            self.namespace_prefix(namespace),
            window.start,
            window.end
        )
    }

    /// Window encoded in a key of this namespace, `None` for foreign or
    /// malformed keys
    pub fn parse_key(&self, namespace: &str, key: &str) -> Option<Window> {
        let bounds = key.strip_prefix(&self.namespace_prefix(namespace))?;
        let (start, end) = bounds.split_once('_')?;
        let window = Window {
            start: start.parse().ok()?,
            end: end.parse().ok()?,
        };
        (window.start < window.end).then_some(window)
    }

    /// Candidates of this namespace whose window intersects `[start, end]`
    pub fn matching_archives<I, S>(&self, namespace: &str, candidates: I, start: i64, end: i64) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        candidates
            .into_iter()
            .filter(|key| {
                self.parse_key(namespace, key.as_ref())
                    .map(|window| window.intersects(start, end))
                    .unwrap_or(false)
            })
            .map(|key| key.as_ref().to_string())
            .collect()
    }
}
