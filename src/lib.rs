//! # Tierstore
//!
//! Tiered time-series event storage: a hot event store for recent data,
//! with older windows archived to blob storage and read back transparently.
//!
//! ## Features
//!
//! - **Hot tier**: in-memory or write-ahead-logged event stores
//! - **Cold tier**: events chunked by time window into blob objects
//! - **Safe expiry**: events are archived before they are deleted
//! - **Lost-update protection**: chunk rewrites are conditional on version
//! - **Cached reads**: a weight-bounded cache keyed by object version
//! - **Select pushdown**: range filters evaluated next to the chunk
//!
//! ## Modules
//!
//! - [`events`]: events, queries and hot stores
//! - [`query`]: metadata and dimension filter matching
//! - [`objects`]: blob stores and the caching client
//! - [`archive`]: chunk naming, encoding and the archiver
//! - [`tiered`]: the hot + cold facade
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tierstore::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ObjectStoreClient::new(
//!         Arc::new(FsBlobStore::open("./objects").await?),
//!         ObjectStoreClientConfig::default(),
//!     );
//!     let archiver = ChunkArchiver::new(client, ArchiverConfig::default()).await?;
//!     let hot = LogEventStore::open(LogStoreConfig::new("./hot"))?;
//!     let store = TieredEventStore::new(Arc::new(hot), Arc::new(archiver));
//!
//!     store
//!         .store("metrics", vec![Event::now().metadata("host", "prod-1").dimension("cpu", 0.55)])
//!         .await?;
//!
//!     // Move everything older than an hour to the cold tier
//!     let cutoff = chrono::Utc::now().timestamp_millis() - 3_600_000;
//!     store.expire("metrics", cutoff).await?;
//!
//!     // Reads span both tiers
//!     let busy = store
//!         .get("metrics", &EventQuery::all().metadata("host", "~prod-*").dimension("cpu", ">=0.5"))
//!         .await?;
//!     println!("{} busy events", busy.len());
//!
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod objects;
pub mod query;
pub mod tiered;

// Re-export top-level types for convenience
pub use error::ErrorKind;

pub use events::{
    dedup_events, Event, EventQuery, EventStore, EventStoreError, EventStoreResult,
    LogEventStore, LogStoreConfig, MemoryEventStore, WalSyncMode,
};

pub use query::{matches, EventMatcher, QueryError, QueryResult};

pub use objects::{
    BlobStore, ByteRange, CacheStats, FsBlobStore, MemoryBlobStore, ObjectMeta, ObjectStoreClient,
    ObjectStoreClientConfig, ObjectStoreError, ObjectStoreResult, PutMode, SelectFormat,
};

pub use archive::{
    ArchiveError, ArchiveReport, ArchiveResult, ArchiverConfig, ChunkArchiver, ChunkCompression,
    ChunkIndex, ColdReadMode, EventsArchiver, RestoreReport,
};

pub use tiered::TieredEventStore;

pub use config::{Config, ConfigError, LoggingConfig, ObjectBackend};
