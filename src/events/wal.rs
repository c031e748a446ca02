//! Write-Ahead Log for the log-backed hot store
//!
//! Every mutation is appended before it is applied to the in-memory index.
//! On open the log is replayed to rebuild that index.
//!
//! Format per entry:
//! - length: u32 (4 bytes)
//! - data: [u8; length] (bincode-serialized `WalRecord`)
//! - crc: u32 (4 bytes, CRC32 of length + data)
//!
//! Replay stops at the first torn or corrupt entry; everything before it is
//! kept.

use super::error::{EventStoreError, EventStoreResult};
use super::types::Event;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Largest entry accepted on replay
const MAX_ENTRY_LEN: usize = 256 * 1024 * 1024;

/// One logged mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    Create { namespace: String },
    Store { namespace: String, events: Vec<Event> },
    Expire { namespace: String, end_timestamp_millis: i64 },
    Drop { namespace: String },
}

/// Sync strategy for WAL writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalSyncMode {
    /// Fsync after every write (safest, slowest)
    EveryWrite,
    /// Fsync in batches (balanced)
    #[default]
    Batched,
    /// No fsync, rely on OS (fastest, risk of loss)
    None,
}

/// Write-Ahead Log for durability
pub struct WriteAheadLog {
    /// File handle for writing
    writer: BufWriter<File>,
    /// Path to WAL file
    path: PathBuf,
    /// Number of entries written
    entry_count: u64,
    /// Bytes written since last sync
    bytes_since_sync: usize,
    /// Sync mode
    sync_mode: WalSyncMode,
    /// Batch sync threshold (bytes)
    sync_threshold: usize,
}

impl WriteAheadLog {
    /// Open or create a WAL file, returning it with the records it holds
    pub fn open(
        path: impl AsRef<Path>,
        sync_mode: WalSyncMode,
    ) -> EventStoreResult<(Self, Vec<WalRecord>)> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (records, valid_len) = Self::replay(&path)?;

        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        // Drop any torn tail so new entries follow the last good one
        if file.metadata()?.len() > valid_len {
            tracing::warn!(
                "Truncating WAL {} from {} to {} bytes",
                path.display(),
                file.metadata()?.len(),
                valid_len
            );
            file.set_len(valid_len)?;
        }
        let mut writer = BufWriter::new(file);
        std::io::Seek::seek(&mut writer, std::io::SeekFrom::End(0))?;

        Ok((
            Self {
                writer,
                path,
                entry_count: records.len() as u64,
                bytes_since_sync: 0,
                sync_mode,
                sync_threshold: 64 * 1024, // 64KB default batch
            },
            records,
        ))
    }

    /// Read every valid entry and the byte length they cover
    fn replay(path: &Path) -> EventStoreResult<(Vec<WalRecord>, u64)> {
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0u64;

        loop {
            match Self::read_entry_from(&mut reader) {
                Ok(Some((record, len))) => {
                    records.push(record);
                    valid_len += len;
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::warn!("WAL recovery stopped at entry {}: {}", records.len(), e);
                    break;
                }
            }
        }

        Ok((records, valid_len))
    }

    /// Append one record
    pub fn append(&mut self, record: &WalRecord) -> EventStoreResult<()> {
        let written = Self::write_entry(&mut self.writer, record)?;
        self.entry_count += 1;
        self.bytes_since_sync += written;

        self.maybe_sync()
    }

    fn write_entry<W: Write>(writer: &mut W, record: &WalRecord) -> EventStoreResult<usize> {
        let data = bincode::serialize(record)?;
        let len = u32::try_from(data.len())
            .map_err(|_| EventStoreError::Wal(format!("Entry length too large: {}", data.len())))?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len.to_le_bytes());
        hasher.update(&data);
        let crc = hasher.finalize();

        // Write: length (4) + data (N) + crc (4)
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&data)?;
        writer.write_all(&crc.to_le_bytes())?;

        Ok(8 + data.len())
    }

    /// Conditionally sync based on mode and threshold
    fn maybe_sync(&mut self) -> EventStoreResult<()> {
        match self.sync_mode {
            WalSyncMode::EveryWrite => {
                self.sync()?;
            }
            WalSyncMode::Batched => {
                if self.bytes_since_sync >= self.sync_threshold {
                    self.sync()?;
                } else {
                    self.writer.flush()?;
                }
            }
            WalSyncMode::None => {
                // Just flush the buffer, no fsync
                self.writer.flush()?;
            }
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> EventStoreResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Read a single entry and its encoded length
    fn read_entry_from<R: Read>(reader: &mut R) -> EventStoreResult<Option<(WalRecord, u64)>> {
        // Read length
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_ENTRY_LEN {
            return Err(EventStoreError::Wal(format!("Entry length too large: {}", len)));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(EventStoreError::Corruption(format!(
                "CRC mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        let record: WalRecord = bincode::deserialize(&data)?;
        Ok(Some((record, 8 + len as u64)))
    }

    /// Replace the log with a compacted set of records
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new log intact.
    pub fn rewrite(&mut self, records: &[WalRecord]) -> EventStoreResult<()> {
        self.sync()?;

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                Self::write_entry(&mut tmp, record)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        self.entry_count = records.len() as u64;
        self.bytes_since_sync = 0;

        Ok(())
    }

    /// Get the number of entries in the WAL
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Get the file size
    pub fn file_size(&self) -> EventStoreResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use tempfile::tempdir;

    fn store_record(namespace: &str, ts: i64) -> WalRecord {
        WalRecord::Store {
            namespace: namespace.to_string(),
            events: vec![Event::new(ts).metadata("host", "h1").dimension("cpu", 0.25)],
        }
    }

    #[test]
    fn test_wal_basic_operations() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        {
            let (mut wal, records) = WriteAheadLog::open(&wal_path, WalSyncMode::EveryWrite).unwrap();
            assert!(records.is_empty());

            wal.append(&store_record("ns", 1000)).unwrap();
            wal.append(&WalRecord::Expire {
                namespace: "ns".to_string(),
                end_timestamp_millis: 500,
            })
            .unwrap();
            assert_eq!(wal.entry_count(), 2);
        }

        {
            let (wal, records) = WriteAheadLog::open(&wal_path, WalSyncMode::EveryWrite).unwrap();
            assert_eq!(wal.entry_count(), 2);
            assert_eq!(records[0], store_record("ns", 1000));
            assert!(matches!(records[1], WalRecord::Expire { end_timestamp_millis: 500, .. }));
        }
    }

    #[test]
    fn test_wal_crc_corruption_detection() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        {
            let (mut wal, _) = WriteAheadLog::open(&wal_path, WalSyncMode::EveryWrite).unwrap();
            wal.append(&store_record("ns", 1000)).unwrap();
        }

        {
            let mut file = OpenOptions::new().write(true).open(&wal_path).unwrap();
            file.seek(SeekFrom::Start(10)).unwrap();
            file.write_all(&[0xFF, 0xFF]).unwrap();
        }

        let (_, records) = WriteAheadLog::open(&wal_path, WalSyncMode::EveryWrite).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_wal_torn_tail_is_dropped_and_appends_continue() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        {
            let (mut wal, _) = WriteAheadLog::open(&wal_path, WalSyncMode::EveryWrite).unwrap();
            wal.append(&store_record("ns", 1)).unwrap();
            wal.append(&store_record("ns", 2)).unwrap();
        }

        // Simulate a crash halfway through the second entry
        let len = std::fs::metadata(&wal_path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&wal_path)
            .unwrap()
            .set_len(len - 5)
            .unwrap();

        {
            let (mut wal, records) = WriteAheadLog::open(&wal_path, WalSyncMode::EveryWrite).unwrap();
            assert_eq!(records, vec![store_record("ns", 1)]);
            wal.append(&store_record("ns", 3)).unwrap();
        }

        let (_, records) = WriteAheadLog::open(&wal_path, WalSyncMode::EveryWrite).unwrap();
        assert_eq!(records, vec![store_record("ns", 1), store_record("ns", 3)]);
    }

    #[test]
    fn test_wal_rewrite_replaces_contents() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        let (mut wal, _) = WriteAheadLog::open(&wal_path, WalSyncMode::Batched).unwrap();
        for i in 0..10 {
            wal.append(&store_record("ns", i)).unwrap();
        }
        let before = wal.file_size().unwrap();

        let compacted = vec![WalRecord::Create {
            namespace: "ns".to_string(),
        }];
        wal.rewrite(&compacted).unwrap();
        assert_eq!(wal.entry_count(), 1);
        assert!(wal.file_size().unwrap() < before);

        wal.append(&store_record("other", 7)).unwrap();
        wal.sync().unwrap();
        drop(wal);

        let (_, records) = WriteAheadLog::open(&wal_path, WalSyncMode::Batched).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], store_record("other", 7));
    }

    #[test]
    fn test_wal_persists_float_bits_and_payloads() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        let record = WalRecord::Store {
            namespace: "ns".to_string(),
            events: vec![
                Event::new(-1).dimension("nan", f64::NAN).dimension("neg_zero", -0.0),
                Event::new(0).payload(Vec::new()),
            ],
        };
        {
            let (mut wal, _) = WriteAheadLog::open(&wal_path, WalSyncMode::None).unwrap();
            wal.append(&record).unwrap();
        }

        let (_, records) = WriteAheadLog::open(&wal_path, WalSyncMode::None).unwrap();
        assert_eq!(records, vec![record]);
    }
}
