//! Tierstore event stores
//!
//! This module provides the hot tier:
//!
//! - **Types**: `Event` and `EventQuery`
//! - **Store**: the `EventStore` trait every tier implements
//! - **Memory**: in-memory store, also the scratch target for cold reads
//! - **Log store**: in-memory index made durable by a write-ahead log
//!
//! # Example
//!
//! ```rust,no_run
//! use tierstore::events::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = LogEventStore::open(LogStoreConfig::new("./data"))?;
//!
//!     store
//!         .store("metrics", vec![Event::now().metadata("host", "h1").dimension("cpu", 0.7)])
//!         .await?;
//!
//!     let busy = store
//!         .get("metrics", &EventQuery::all().dimension("cpu", ">0.5"))
//!         .await?;
//!     println!("{} busy events", busy.len());
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod log_store;
pub mod memory;
pub mod store;
pub mod types;
pub mod wal;

pub use error::{EventStoreError, EventStoreResult};
pub use log_store::{LogEventStore, LogStoreConfig};
pub use memory::MemoryEventStore;
pub use store::EventStore;
pub use types::{dedup_events, Event, EventQuery};
pub use wal::{WalRecord, WalSyncMode, WriteAheadLog};
