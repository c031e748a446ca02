//! Blob storage for the cold tier
//!
//! - **Blob**: the `BlobStore` trait and its value types
//! - **Memory / Fs**: in-process and local-directory backends
//! - **Client**: listing, cached reads, owner-stamped writes, select pushdown
//! - **Select**: the single-object SQL dialect and its streaming evaluator

pub mod blob;
pub mod client;
pub mod error;
pub mod fs;
pub mod memory;
pub mod select;

pub use blob::{
    Acl, BlobStore, ByteRange, ByteStream, GetResult, ListPage, ObjectMeta, PutMode, PutOptions,
    STREAMING_CHUNK_SIZE,
};
pub use client::{CacheStats, ObjectStoreClient, ObjectStoreClientConfig};
pub use error::{ObjectStoreError, ObjectStoreResult};
pub use fs::FsBlobStore;
pub use memory::{MemoryBlobStore, DEFAULT_PAGE_SIZE};
pub use select::{SelectFormat, SelectRequest, SelectRow, SelectRows};
