//! Cold tier: chunked archives of events
//!
//! - **Chunk index**: window math and deterministic chunk keys
//! - **Codec**: NDJSON chunk bodies, optionally LZ4 framed
//! - **Archiver**: archive, restore and cold reads with conditional writes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tierstore::archive::*;
//! use tierstore::events::*;
//! use tierstore::objects::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ObjectStoreClient::new(
//!         Arc::new(MemoryBlobStore::new()),
//!         ObjectStoreClientConfig::default(),
//!     );
//!     let archiver = ChunkArchiver::new(client, ArchiverConfig::default()).await?;
//!
//!     let hot = MemoryEventStore::new();
//!     hot.store("ns1", vec![Event::new(0), Event::new(3_600_001)]).await?;
//!     archiver.archive_all_before(&hot, "ns1", 3_600_002).await?;
//!
//!     assert!(archiver.has_archives("ns1", 0, 7_200_000).await?);
//!     Ok(())
//! }
//! ```

pub mod archiver;
pub mod chunk_index;
pub mod codec;
pub mod error;

pub use archiver::{
    ArchiveReport, ArchiverConfig, ChunkArchiver, ColdReadMode, EventsArchiver, RestoreReport,
};
pub use chunk_index::{floor, namespace_slug, ChunkIndex, Window, DEFAULT_ARCHIVE_PREFIX};
pub use codec::{chunk_stats, decode_chunk, encode_chunk, ChunkCompression, ChunkStats};
pub use error::{ArchiveError, ArchiveResult};
