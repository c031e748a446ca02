//! Log-backed hot store
//!
//! Mutations go to the write-ahead log first and are then applied to an
//! in-memory [`NamespaceIndex`]. Opening the store replays the log. Once the
//! log holds `compact_after_entries` records it is rewritten as one `Create`
//! and one `Store` record per namespace.
//!
//! Lock order is always WAL then index, so the log and the index see
//! mutations in the same order.

use super::error::EventStoreResult;
use super::memory::{validate_namespace, NamespaceIndex};
use super::store::EventStore;
use super::types::{Event, EventQuery};
use super::wal::{WalRecord, WalSyncMode, WriteAheadLog};
use crate::query::EventMatcher;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

/// Configuration for the log-backed store
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    /// Directory holding the WAL
    pub data_dir: PathBuf,
    /// WAL sync strategy
    pub wal_sync: WalSyncMode,
    /// Compact once the log holds this many records (0 disables)
    pub compact_after_entries: u64,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("tierstore_data"),
            wal_sync: WalSyncMode::Batched,
            compact_after_entries: 10_000,
        }
    }
}

impl LogStoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Get path to WAL file
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("wal").join("events.wal")
    }
}

/// Durable hot store
pub struct LogEventStore {
    config: LogStoreConfig,
    wal: Mutex<WriteAheadLog>,
    index: RwLock<NamespaceIndex>,
}

impl LogEventStore {
    /// Open the store, replaying any existing log
    pub fn open(config: LogStoreConfig) -> EventStoreResult<Self> {
        let (wal, records) = WriteAheadLog::open(config.wal_path(), config.wal_sync)?;

        let mut index = NamespaceIndex::new();
        let replayed = records.len();
        for record in records {
            apply(&mut index, record);
        }

        tracing::info!(
            "Opened log store at {} ({} records replayed, {} events)",
            config.data_dir.display(),
            replayed,
            index.event_count()
        );

        Ok(Self {
            config,
            wal: Mutex::new(wal),
            index: RwLock::new(index),
        })
    }

    async fn log_and_apply(&self, record: WalRecord) -> EventStoreResult<()> {
        let mut wal = self.wal.lock().await;
        wal.append(&record)?;
        apply(&mut *self.index.write().await, record);

        let threshold = self.config.compact_after_entries;
        if threshold > 0 && wal.entry_count() >= threshold {
            self.compact_locked(&mut wal).await?;
        }
        Ok(())
    }

    /// Rewrite the log as a snapshot of the current index
    pub async fn compact(&self) -> EventStoreResult<()> {
        let mut wal = self.wal.lock().await;
        self.compact_locked(&mut wal).await
    }

    async fn compact_locked(&self, wal: &mut WriteAheadLog) -> EventStoreResult<()> {
        let before = wal.entry_count();
        let records: Vec<WalRecord> = {
            let index = self.index.read().await;
            index
                .namespaces()
                .into_iter()
                .flat_map(|namespace| {
                    let events = index.events(&namespace);
                    let mut records = vec![WalRecord::Create {
                        namespace: namespace.clone(),
                    }];
                    if !events.is_empty() {
                        records.push(WalRecord::Store { namespace, events });
                    }
                    records
                })
                .collect()
        };
        wal.rewrite(&records)?;
        tracing::info!("Compacted WAL from {} to {} records", before, records.len());
        Ok(())
    }

    /// Force the log to disk
    pub async fn sync(&self) -> EventStoreResult<()> {
        self.wal.lock().await.sync()
    }

    /// Number of records currently in the log
    pub async fn wal_entries(&self) -> u64 {
        self.wal.lock().await.entry_count()
    }

    /// Total number of events across all namespaces
    pub async fn event_count(&self) -> usize {
        self.index.read().await.event_count()
    }
}

fn apply(index: &mut NamespaceIndex, record: WalRecord) {
    match record {
        WalRecord::Create { namespace } => index.create(&namespace),
        WalRecord::Store { namespace, events } => index.insert(&namespace, events),
        WalRecord::Expire {
            namespace,
            end_timestamp_millis,
        } => {
            index.expire(&namespace, end_timestamp_millis);
        }
        WalRecord::Drop { namespace } => {
            index.drop_namespace(&namespace);
        }
    }
}

#[async_trait]
impl EventStore for LogEventStore {
    async fn namespaces(&self) -> EventStoreResult<Vec<String>> {
        Ok(self.index.read().await.namespaces())
    }

    async fn create(&self, namespace: &str) -> EventStoreResult<()> {
        validate_namespace(namespace)?;
        self.log_and_apply(WalRecord::Create {
            namespace: namespace.to_string(),
        })
        .await
    }

    async fn drop_namespace(&self, namespace: &str) -> EventStoreResult<()> {
        self.log_and_apply(WalRecord::Drop {
            namespace: namespace.to_string(),
        })
        .await
    }

    async fn store(&self, namespace: &str, batch: Vec<Event>) -> EventStoreResult<()> {
        validate_namespace(namespace)?;
        if batch.is_empty() {
            return self.create(namespace).await;
        }
        self.log_and_apply(WalRecord::Store {
            namespace: namespace.to_string(),
            events: batch,
        })
        .await
    }

    async fn get(&self, namespace: &str, query: &EventQuery) -> EventStoreResult<Vec<Event>> {
        let matcher = EventMatcher::for_query(query)?;
        Ok(self.index.read().await.query(namespace, query, &matcher))
    }

    async fn expire(&self, namespace: &str, end_timestamp_millis: i64) -> EventStoreResult<()> {
        self.log_and_apply(WalRecord::Expire {
            namespace: namespace.to_string(),
            end_timestamp_millis,
        })
        .await
    }
}
