//! Chunk body encoding
//!
//! A chunk body is newline-delimited JSON, one record per event, sorted by
//! timestamp:
//!
//! ```text
//! {"timestamp":0,"metadata":{"host":"a"},"dimensions":{"cpu":0.5},"payload":[1,2]}
//! ```
//!
//! Dimension values that JSON cannot represent are written as the strings
//! `"NaN"`, `"Infinity"` and `"-Infinity"`. The payload field is omitted for
//! events without one, so an absent payload and an empty payload stay
//! distinct.
//!
//! Bodies may additionally be LZ4 framed:
//!
//! ```text
//! b"TSZ4" | crc32 of compressed bytes (u32 LE) | lz4 block with prepended size
//! ```
//!
//! Decoding detects the framing from the magic, so chunks written under
//! different settings can be mixed in one namespace.

use super::error::{ArchiveError, ArchiveResult};
use crate::events::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LZ4_MAGIC: &[u8; 4] = b"TSZ4";
const LZ4_HEADER_LEN: usize = 8;

/// How chunk bodies are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCompression {
    /// Plain NDJSON, readable by select
    #[default]
    None,
    /// NDJSON inside a checksummed LZ4 frame
    Lz4,
}

impl ChunkCompression {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkCompression::None => "none",
            ChunkCompression::Lz4 => "lz4",
        }
    }
}

/// Wire form of a dimension value
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum DimensionValue {
    Number(f64),
    Text(String),
}

impl DimensionValue {
    fn encode(value: f64) -> Self {
        if value.is_nan() {
            DimensionValue::Text("NaN".to_string())
        } else if value == f64::INFINITY {
            DimensionValue::Text("Infinity".to_string())
        } else if value == f64::NEG_INFINITY {
            DimensionValue::Text("-Infinity".to_string())
        } else {
            DimensionValue::Number(value)
        }
    }

    fn decode(self, key: &str) -> ArchiveResult<f64> {
        match self {
            DimensionValue::Number(value) => Ok(value),
            DimensionValue::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(ArchiveError::Serialization(format!(
                    "dimension {} has non-numeric value {:?}",
                    key, other
                ))),
            },
        }
    }
}

/// One line of a chunk body
#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    timestamp: i64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    dimensions: BTreeMap<String, DimensionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Vec<u8>>,
}

impl ChunkRecord {
    fn from_event(event: &Event) -> Self {
        Self {
            timestamp: event.timestamp_millis,
            metadata: event.metadata.clone(),
            dimensions: event
                .dimensions
                .iter()
                .map(|(key, value)| (key.clone(), DimensionValue::encode(*value)))
                .collect(),
            payload: event.payload.clone(),
        }
    }

    fn into_event(self) -> ArchiveResult<Event> {
        let dimensions = self
            .dimensions
            .into_iter()
            .map(|(key, value)| {
                let value = value.decode(&key)?;
                Ok((key, value))
            })
            .collect::<ArchiveResult<BTreeMap<_, _>>>()?;

        Ok(Event {
            timestamp_millis: self.timestamp,
            metadata: self.metadata,
            dimensions,
            payload: self.payload,
        })
    }
}

/// Encode events as a chunk body, sorted by timestamp
pub fn encode_chunk(events: &[Event], compression: ChunkCompression) -> ArchiveResult<Vec<u8>> {
    let mut sorted: Vec<&Event> = events.iter().collect();
    sorted.sort_by_key(|e| e.timestamp_millis);

    let mut body = Vec::with_capacity(events.iter().map(Event::estimated_size).sum::<usize>() * 2);
    for event in sorted {
        serde_json::to_writer(&mut body, &ChunkRecord::from_event(event))?;
        body.push(b'\n');
    }

    match compression {
        ChunkCompression::None => Ok(body),
        ChunkCompression::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(&body);
            let mut framed = Vec::with_capacity(LZ4_HEADER_LEN + compressed.len());
            framed.extend_from_slice(LZ4_MAGIC);
            framed.extend_from_slice(&crc32fast::hash(&compressed).to_le_bytes());
            framed.extend_from_slice(&compressed);
            Ok(framed)
        }
    }
}

/// Decode a chunk body written by [`encode_chunk`]
pub fn decode_chunk(data: &[u8]) -> ArchiveResult<Vec<Event>> {
    if data.starts_with(LZ4_MAGIC) {
        let body = unframe_lz4(data)?;
        return decode_lines(&body);
    }
    decode_lines(data)
}

fn unframe_lz4(data: &[u8]) -> ArchiveResult<Vec<u8>> {
    if data.len() < LZ4_HEADER_LEN {
        return Err(ArchiveError::Corruption("truncated lz4 header".to_string()));
    }
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&data[4..LZ4_HEADER_LEN]);
    let expected = u32::from_le_bytes(crc_bytes);
    let compressed = &data[LZ4_HEADER_LEN..];

    let actual = crc32fast::hash(compressed);
    if actual != expected {
        return Err(ArchiveError::Corruption(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }

    lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| ArchiveError::Corruption(format!("LZ4 decompression failed: {}", e)))
}

fn decode_lines(body: &[u8]) -> ArchiveResult<Vec<Event>> {
    let mut events = Vec::new();
    for line in body.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record: ChunkRecord = serde_json::from_slice(line)?;
        events.push(record.into_event()?);
    }
    events.sort_by_key(|e| e.timestamp_millis);
    Ok(events)
}

/// Convert one chunk record, as returned by a JSON select, into an event
pub fn record_from_json(value: serde_json::Value) -> ArchiveResult<Event> {
    let record: ChunkRecord = serde_json::from_value(value)?;
    record.into_event()
}

/// Size statistics for an encoded chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkStats {
    pub event_count: usize,
    /// Estimated in-memory size of the events
    pub original_size: usize,
    pub encoded_size: usize,
    /// original / encoded
    pub ratio: f64,
}

pub fn chunk_stats(events: &[Event], encoded: &[u8]) -> ChunkStats {
    let original_size: usize = events.iter().map(Event::estimated_size).sum();
    let encoded_size = encoded.len();
    let ratio = if encoded_size > 0 {
        original_size as f64 / encoded_size as f64
    } else {
        0.0
    };

    ChunkStats {
        event_count: events.len(),
        original_size,
        encoded_size,
        ratio,
    }
}
