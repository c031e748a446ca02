//! The blob store abstraction
//!
//! A [`BlobStore`] is a flat namespace of buckets holding immutable-per-write
//! objects addressed by string keys. Every write produces a new opaque
//! version, which conditional writes and the client cache key on.

use super::error::{ObjectStoreError, ObjectStoreResult};
use super::select::{self, SelectRequest, SelectRows};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Objects are streamed in pieces of this size
pub const STREAMING_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// A lazily consumed object body
pub type ByteStream = BoxStream<'static, ObjectStoreResult<Bytes>>;

/// Which bytes of an object to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteRange {
    /// The whole object
    Full,
    /// From an offset to the end
    From(u64),
    /// Inclusive byte positions
    Inclusive { start: u64, end: u64 },
}

impl ByteRange {
    /// Build a range from signed bounds
    ///
    /// `start >= 0 && end > 0` reads `[start, end]`, `start > 0 && end < 0`
    /// reads from `start` to the end, and anything else reads everything.
    pub fn from_bounds(start: i64, end: i64) -> Self {
        if start >= 0 && end > 0 {
            ByteRange::Inclusive {
                start: start as u64,
                end: end as u64,
            }
        } else if start > 0 && end < 0 {
            ByteRange::From(start as u64)
        } else {
            ByteRange::Full
        }
    }

    /// Clamp to an object of `len` bytes as a half-open range
    pub fn resolve(&self, len: u64) -> Range<u64> {
        let (start, end) = match *self {
            ByteRange::Full => (0, len),
            ByteRange::From(start) => (start, len),
            ByteRange::Inclusive { start, end } => (start, end.saturating_add(1)),
        };
        let end = end.min(len);
        start.min(end)..end
    }
}

/// Access policy recorded with an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    #[default]
    Private,
    BucketOwnerFullControl,
}

/// Object attributes returned by `head`, `get` and `put`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    /// Full object size in bytes
    pub size: u64,
    /// Opaque token that changes on every write
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub acl: Acl,
}

/// Write precondition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PutMode {
    /// Unconditional
    #[default]
    Overwrite,
    /// Fail if the object exists
    Create,
    /// Fail unless the object exists at this version
    Update(String),
}

/// Options for a write
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub mode: PutMode,
    pub acl: Acl,
    pub metadata: BTreeMap<String, String>,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys in ascending order
    pub keys: Vec<String>,
    /// Pass back as `start_after` to fetch the next page
    pub next: Option<String>,
}

/// An open object read
pub struct GetResult {
    pub meta: ObjectMeta,
    /// Requested range, in chunks of at most [`STREAMING_CHUNK_SIZE`]
    pub stream: ByteStream,
}

/// Split an in-memory body into streaming chunks
pub(crate) fn chunked(body: Bytes) -> ByteStream {
    let len = body.len();
    let pieces = (0..len)
        .step_by(STREAMING_CHUNK_SIZE)
        .map(move |offset| Ok(body.slice(offset..(offset + STREAMING_CHUNK_SIZE).min(len))))
        .collect::<Vec<_>>();
    stream::iter(pieces).boxed()
}

/// Bucket and object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool>;

    /// Create a bucket; creating an existing one is a no-op
    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()>;

    /// One page of keys under `prefix`, strictly after `start_after`
    ///
    /// Fails with `BucketNotFound` when the bucket is missing.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
    ) -> ObjectStoreResult<ListPage>;

    /// Object attributes, `None` when the object (or bucket) is missing
    async fn head(&self, bucket: &str, key: &str) -> ObjectStoreResult<Option<ObjectMeta>>;

    /// Open a ranged read, `None` when the object (or bucket) is missing
    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> ObjectStoreResult<Option<GetResult>>;

    /// Write an object, honouring `options.mode`
    ///
    /// Fails with `BucketNotFound` when the bucket is missing and
    /// `PreconditionFailed` when the mode does not hold.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> ObjectStoreResult<ObjectMeta>;

    /// Delete one object, returning whether it existed
    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool>;

    /// Delete several objects
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> ObjectStoreResult<()> {
        for key in keys {
            self.delete(bucket, key).await?;
        }
        Ok(())
    }

    /// Evaluate a select expression against one object
    ///
    /// The default streams the object and evaluates rows as they arrive.
    async fn select(
        &self,
        bucket: &str,
        key: &str,
        request: SelectRequest,
    ) -> ObjectStoreResult<SelectRows> {
        let statement = select::parse_select(&request.expression)?;
        let Some(object) = self.get(bucket, key, ByteRange::Full).await? else {
            return Err(ObjectStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        };
        Ok(select::evaluate(object.stream, request.format, statement))
    }
}
