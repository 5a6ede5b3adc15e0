//! # Frame Codec
//!
//! Payloads travel as UTF-8 JSON. When a serialized payload exceeds the
//! transport's frame limit it is split into chunk envelopes:
//!
//! ```text
//! {"__chunked":true,"id":"<group>","index":0,"total":3,"chunk":"<base64>","encoding":"base64"}
//! ```
//!
//! Each envelope carries a base64 slice of the original bytes; the receiver
//! concatenates slices in `index` order once all `total` have arrived.
//!
//! ## Module Structure
//!
//! - `reassembly` - per-group fragment buffer with TTL and bounds

mod reassembly;


pub use reassembly::{ChunkAccept, ChunkReassembler, GroupKey, ReassemblyConfig};

use crate::errors::CodecError;
use crate::MAX_CHUNKS_PER_GROUP;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Marker field identifying a chunk envelope.
pub const CHUNK_MARKER: &str = "__chunked";

/// The only chunk encoding produced and accepted.
pub const CHUNK_ENCODING: &str = "base64";

/// Bytes reserved in each frame for the envelope around the chunk data.
pub const ENVELOPE_OVERHEAD: usize = 256;

/// One fragment of an oversized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    #[serde(rename = "__chunked")]
    pub chunked: bool,
    /// Group id shared by all fragments of one payload.
    pub id: String,
    /// 0-based position.
    pub index: usize,
    /// Number of fragments in the group.
    pub total: usize,
    /// Encoded slice of the payload bytes.
    pub chunk: String,
    pub encoding: String,
}

impl ChunkEnvelope {
    /// Check structural invariants and decode the chunk data.
    pub fn decode_data(&self) -> Result<Vec<u8>, CodecError> {
        if !self.chunked {
            return Err(CodecError::MalformedChunk("__chunked is false".into()));
        }
        if self.total == 0 {
            return Err(CodecError::MalformedChunk("total is zero".into()));
        }
        if self.index >= self.total {
            return Err(CodecError::MalformedChunk(format!(
                "index {} out of range for total {}",
                self.index, self.total
            )));
        }
        if self.encoding != CHUNK_ENCODING {
            return Err(CodecError::UnsupportedEncoding(self.encoding.clone()));
        }
        STANDARD
            .decode(self.chunk.as_bytes())
            .map_err(|e| CodecError::InvalidBase64(e.to_string()))
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete, unfragmented payload.
    Message(Value),
    /// One fragment of a larger payload.
    Chunk(ChunkEnvelope),
}

/// Serializes payloads into frames no larger than `max_payload_size`.
#[derive(Debug, Clone)]
pub struct Codec {
    max_payload_size: usize,
    max_chunks: usize,
}

impl Codec {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size,
            max_chunks: MAX_CHUNKS_PER_GROUP,
        }
    }

    /// Limit the number of fragments a single payload may produce.
    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Raw payload bytes carried per chunk once base64 and the envelope are
    /// accounted for.
    pub fn chunk_data_size(&self) -> Result<usize, CodecError> {
        let room = self.max_payload_size.saturating_sub(ENVELOPE_OVERHEAD);
        let size = room / 4 * 3;
        if size == 0 {
            return Err(CodecError::PayloadLimitTooSmall {
                limit: self.max_payload_size,
            });
        }
        Ok(size)
    }

    /// Serialize `payload` into one or more frames, in publish order.
    pub fn encode(&self, payload: &Value) -> Result<Vec<Vec<u8>>, CodecError> {
        let bytes = serde_json::to_vec(payload).map_err(|e| CodecError::Serialize(e.to_string()))?;
        self.encode_bytes(bytes)
    }

    /// Frame already-serialized payload bytes.
    pub fn encode_bytes(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, CodecError> {
        if bytes.len() <= self.max_payload_size {
            return Ok(vec![bytes]);
        }
        self.fragment(&bytes)
    }

    fn fragment(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
        let data_size = self.chunk_data_size()?;
        let total = bytes.len().div_ceil(data_size);
        if total > self.max_chunks {
            return Err(CodecError::TooManyChunks {
                needed: total,
                limit: self.max_chunks,
            });
        }

        let group_id = Uuid::new_v4().to_string();
        bytes
            .chunks(data_size)
            .enumerate()
            .map(|(index, slice)| {
                let envelope = ChunkEnvelope {
                    chunked: true,
                    id: group_id.clone(),
                    index,
                    total,
                    chunk: STANDARD.encode(slice),
                    encoding: CHUNK_ENCODING.to_string(),
                };
                serde_json::to_vec(&envelope).map_err(|e| CodecError::Serialize(e.to_string()))
            })
            .collect()
    }

    /// Classify an inbound frame.
    pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
        let value = Self::parse_payload(bytes)?;
        let is_chunk = value
            .get(CHUNK_MARKER)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !is_chunk {
            return Ok(Frame::Message(value));
        }
        let envelope: ChunkEnvelope = serde_json::from_value(value)
            .map_err(|e| CodecError::MalformedChunk(e.to_string()))?;
        Ok(Frame::Chunk(envelope))
    }

    /// Parse reassembled (or direct) bytes as a JSON payload.
    pub fn parse_payload(bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::InvalidJson(e.to_string()))
    }
}
