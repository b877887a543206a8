//! Wire frames exchanged over a peer data channel.
//!
//! Every frame is a JSON object tagged by `type`. A file moves as one
//! `file-info` announcement, `ceil(len / chunk_size)` `file-chunk` frames
//! and a closing `file-complete`. Chunk bytes travel as a JSON number array.

use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// maximum bytes carried by one chunk frame unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// largest chunk a receiver accepts, and the ceiling for configured sizes
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// most chunks one file may be split into
pub const MAX_TOTAL_CHUNKS: usize = 1 << 20;

/// longest encoded frame a stream channel will buffer; bytes encode as up to
/// four characters (`255,`) plus the surrounding fields
pub const MAX_FRAME_LEN: usize = MAX_CHUNK_SIZE * 4 + 4096;

/// a single frame on the data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransferMessage {
    /// announces a file before any of its chunks
    #[serde(rename = "file-info")]
    FileInfo(FileAnnouncement),

    /// one slice of the payload
    #[serde(rename = "file-chunk")]
    FileChunk(FileChunk),

    /// sender has emitted every chunk
    #[serde(rename = "file-complete")]
    FileComplete { id: String },

    /// whole payload in a single frame, accepted for older senders
    #[serde(rename = "file-data")]
    FileData { id: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnnouncement {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "fileType", default)]
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub data: Vec<u8>,
}

impl TransferMessage {
    /// file id the frame refers to
    pub fn file_id(&self) -> &str {
        match self {
            TransferMessage::FileInfo(info) => &info.id,
            TransferMessage::FileChunk(chunk) => &chunk.id,
            TransferMessage::FileComplete { id } => id,
            TransferMessage::FileData { id, .. } => id,
        }
    }

    pub fn encode(&self) -> Result<String, TransferError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self, TransferError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// best effort extraction of the `id` field from a frame that failed to decode
pub fn peek_file_id(frame: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(frame).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}

/// number of chunks needed for `len` bytes
pub fn chunk_count(len: usize, chunk_size: usize) -> Result<usize, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::ZeroChunkSize);
    }
    Ok(len.div_ceil(chunk_size))
}

/// split a payload into `file-chunk` frames in index order
pub fn chunk_payload(
    id: &str,
    payload: &[u8],
    chunk_size: usize,
) -> Result<Vec<TransferMessage>, TransferError> {
    let total_chunks = chunk_count(payload.len(), chunk_size)?;

    Ok(payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(chunk_index, slice)| {
            TransferMessage::FileChunk(FileChunk {
                id: id.to_string(),
                chunk_index,
                total_chunks,
                data: slice.to_vec(),
            })
        })
        .collect())
}
