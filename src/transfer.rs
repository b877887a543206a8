//! Sending files over a data channel and reassembling them on receipt.
//!
//! The receiver keeps one [`ReassemblyBuffer`] per file id. Chunks may arrive
//! out of order or more than once; a chunk already recorded at its index does
//! not count again. A `file-complete` frame that arrives before every chunk is
//! remembered and the buffer finalizes as soon as the last chunk lands.
//!
//! Every count and length in a frame comes from the remote peer, so buffers
//! only hold the chunks that actually arrived and are checked against
//! [`TransferLimits`] and the announced size before anything is stored.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;

use crate::channel::DataChannel;
use crate::error::TransferError;
use crate::files::SharedFile;
use crate::protocol::{
    chunk_payload, peek_file_id, FileAnnouncement, FileChunk, TransferMessage, MAX_CHUNK_SIZE,
    MAX_TOTAL_CHUNKS,
};

/// largest file a receiver accepts unless configured otherwise
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// what applying an incoming frame produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// a new file was announced, record it as downloading at 0%
    Announced(FileAnnouncement),
    /// a distinct chunk was accepted
    Progress {
        id: String,
        received: usize,
        total: usize,
        percent: u8,
    },
    /// every chunk is present; bytes are in index order
    Completed { id: String, data: Bytes },
    /// completion was requested with chunks still missing
    Incomplete {
        id: String,
        received: usize,
        total: usize,
    },
    /// the transfer for this file cannot continue
    Failed { id: String, reason: String },
    /// frame was unusable and named no file
    Rejected { reason: String },
}

/// bounds applied to everything a peer sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    pub max_chunk_size: usize,
    pub max_file_size: u64,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl TransferLimits {
    fn check_announce(&self, announce: &FileAnnouncement) -> Result<(), TransferError> {
        if announce.size > self.max_file_size {
            return Err(TransferError::TooLarge {
                id: announce.id.clone(),
                size: announce.size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    // checks that need no buffer state
    fn check_chunk(&self, chunk: &FileChunk) -> Result<(), TransferError> {
        let reason = if chunk.total_chunks == 0 {
            "chunk frame declares zero chunks".to_string()
        } else if chunk.total_chunks > MAX_TOTAL_CHUNKS {
            format!(
                "{} chunks exceeds the limit of {}",
                chunk.total_chunks, MAX_TOTAL_CHUNKS
            )
        } else if chunk.chunk_index >= chunk.total_chunks {
            format!(
                "chunk index {} out of range for {} chunks",
                chunk.chunk_index, chunk.total_chunks
            )
        } else if chunk.data.is_empty() {
            "chunk carries no data".to_string()
        } else if chunk.data.len() > self.max_chunk_size {
            format!(
                "chunk of {} bytes exceeds {} bytes",
                chunk.data.len(),
                self.max_chunk_size
            )
        } else {
            return Ok(());
        };
        Err(TransferError::InvalidChunk {
            id: chunk.id.clone(),
            reason,
        })
    }
}

/// chunks collected for one file
#[derive(Debug)]
pub struct ReassemblyBuffer {
    chunks: BTreeMap<usize, Bytes>,
    received_bytes: u64,
    total: usize,
    /// size from `file-info`, `None` when chunks arrived unannounced
    declared_size: Option<u64>,
    completion_requested: bool,
    last_activity: Instant,
}

impl ReassemblyBuffer {
    fn new(declared_size: Option<u64>) -> Self {
        Self {
            chunks: BTreeMap::new(),
            received_bytes: 0,
            total: 0,
            declared_size,
            completion_requested: false,
            last_activity: Instant::now(),
        }
    }

    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    // a non-empty file with no chunk seen yet has an unknown total
    fn is_complete(&self) -> bool {
        if self.total == 0 {
            return self.declared_size == Some(0);
        }
        self.chunks.len() == self.total
    }

    /// whether one more chunk of `len` bytes fits this buffer
    fn admit(
        &self,
        id: &str,
        total_chunks: usize,
        len: usize,
        limits: &TransferLimits,
    ) -> Result<(), TransferError> {
        let invalid = |reason: String| TransferError::InvalidChunk {
            id: id.to_string(),
            reason,
        };

        if self.total != 0 && self.total != total_chunks {
            return Err(invalid(format!(
                "total chunk count changed from {} to {}",
                self.total, total_chunks
            )));
        }
        if let Some(size) = self.declared_size {
            let total = total_chunks as u64;
            if total > size || total.saturating_mul(limits.max_chunk_size as u64) < size {
                return Err(invalid(format!(
                    "{} chunks cannot carry the announced {} bytes",
                    total_chunks, size
                )));
            }
        }
        let budget = self.declared_size.unwrap_or(limits.max_file_size);
        if self.received_bytes + len as u64 > budget {
            return Err(invalid(format!("chunks exceed {} bytes", budget)));
        }
        Ok(())
    }

    fn assemble(self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.received_bytes as usize);
        for chunk in self.chunks.into_values() {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

/// percentage of distinct chunks received, rounded to the nearest integer
pub fn progress_percent(received: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((received * 100 + total / 2) / total).min(100) as u8
}

/// receiver side state for every in-flight file of one peer
#[derive(Debug, Default)]
pub struct Reassembler {
    buffers: DashMap<String, ReassemblyBuffer>,
    limits: TransferLimits,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: TransferLimits) -> Self {
        Self {
            buffers: DashMap::new(),
            limits,
        }
    }

    /// number of files still being assembled
    pub fn in_flight(&self) -> usize {
        self.buffers.len()
    }

    /// (received, total) for a file still being assembled
    pub fn counts(&self, id: &str) -> Option<(usize, usize)> {
        self.buffers.get(id).map(|b| (b.received(), b.total))
    }

    /// forget a buffer without reporting anything
    pub fn discard(&self, id: &str) -> bool {
        self.buffers.remove(id).is_some()
    }

    /// decode a raw frame and apply it; failures come back as events
    pub fn handle_frame(&self, frame: &str) -> Vec<TransferEvent> {
        match TransferMessage::decode(frame) {
            Ok(message) => self.apply(message),
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                match peek_file_id(frame) {
                    Some(id) => {
                        self.buffers.remove(&id);
                        vec![TransferEvent::Failed {
                            id,
                            reason: e.to_string(),
                        }]
                    }
                    None => vec![TransferEvent::Rejected {
                        reason: e.to_string(),
                    }],
                }
            }
        }
    }

    pub fn apply(&self, message: TransferMessage) -> Vec<TransferEvent> {
        match message {
            TransferMessage::FileInfo(announce) => self.on_announce(announce),
            TransferMessage::FileChunk(chunk) => self.on_chunk(chunk),
            TransferMessage::FileComplete { id } => self.on_complete(id),
            TransferMessage::FileData { id, data } => {
                tracing::debug!("Received single-frame payload for {}", id);
                if data.len() as u64 > self.limits.max_file_size {
                    let err = TransferError::TooLarge {
                        id: id.clone(),
                        size: data.len() as u64,
                        limit: self.limits.max_file_size,
                    };
                    return self.fail(id, err.to_string());
                }
                self.buffers.remove(&id);
                vec![TransferEvent::Completed {
                    id,
                    data: Bytes::from(data),
                }]
            }
        }
    }

    fn on_announce(&self, announce: FileAnnouncement) -> Vec<TransferEvent> {
        if self.buffers.contains_key(&announce.id) {
            tracing::warn!("Ignoring repeated announcement for {}", announce.id);
            return Vec::new();
        }
        if let Err(e) = self.limits.check_announce(&announce) {
            return self.fail(announce.id, e.to_string());
        }
        tracing::info!("📥 Incoming file {} ({} bytes)", announce.name, announce.size);
        self.buffers.insert(
            announce.id.clone(),
            ReassemblyBuffer::new(Some(announce.size)),
        );
        vec![TransferEvent::Announced(announce)]
    }

    fn on_chunk(&self, chunk: FileChunk) -> Vec<TransferEvent> {
        if let Err(e) = self.limits.check_chunk(&chunk) {
            return self.fail(chunk.id, e.to_string());
        }
        let FileChunk {
            id,
            chunk_index,
            total_chunks,
            data,
        } = chunk;

        let mut buffer = self
            .buffers
            .entry(id.clone())
            .or_insert_with(|| ReassemblyBuffer::new(None));
        buffer.last_activity = Instant::now();

        if buffer.total == total_chunks && buffer.chunks.contains_key(&chunk_index) {
            tracing::trace!("Duplicate chunk {} for {}", chunk_index, id);
            return Vec::new();
        }
        if let Err(e) = buffer.admit(&id, total_chunks, data.len(), &self.limits) {
            drop(buffer);
            return self.fail(id, e.to_string());
        }

        buffer.total = total_chunks;
        buffer.received_bytes += data.len() as u64;
        buffer.chunks.insert(chunk_index, Bytes::from(data));

        let received = buffer.received();
        let total = buffer.total;
        let finalize = buffer.completion_requested && buffer.is_complete();
        drop(buffer);

        tracing::trace!("📦 Chunk {}/{} for {}", received, total, id);

        let mut events = vec![TransferEvent::Progress {
            id: id.clone(),
            received,
            total,
            percent: progress_percent(received, total),
        }];
        if finalize {
            events.extend(self.finalize(id));
        }
        events
    }

    fn on_complete(&self, id: String) -> Vec<TransferEvent> {
        let Some(mut buffer) = self.buffers.get_mut(&id) else {
            tracing::warn!("Completion for unknown transfer {}", id);
            return vec![TransferEvent::Failed {
                id,
                reason: "completion for unknown transfer".to_string(),
            }];
        };

        if buffer.is_complete() {
            drop(buffer);
            return self.finalize(id);
        }

        buffer.completion_requested = true;
        buffer.last_activity = Instant::now();
        let (received, total) = (buffer.received(), buffer.total);
        drop(buffer);

        tracing::warn!("Completion for {} with {}/{} chunks, waiting", id, received, total);
        vec![TransferEvent::Incomplete {
            id,
            received,
            total,
        }]
    }

    fn finalize(&self, id: String) -> Vec<TransferEvent> {
        match self.buffers.remove(&id) {
            Some((_, buffer)) => {
                let data = buffer.assemble();
                tracing::info!("✅ Reassembled {} ({} bytes)", id, data.len());
                vec![TransferEvent::Completed { id, data }]
            }
            None => Vec::new(),
        }
    }

    fn fail(&self, id: String, reason: String) -> Vec<TransferEvent> {
        tracing::warn!("❌ Transfer {} failed: {}", id, reason);
        self.buffers.remove(&id);
        vec![TransferEvent::Failed { id, reason }]
    }

    /// drop buffers idle for longer than `timeout` and report them failed
    pub fn sweep_stalled(&self, timeout: Duration) -> Vec<TransferEvent> {
        let stalled: Vec<String> = self
            .buffers
            .iter()
            .filter(|b| b.last_activity.elapsed() >= timeout)
            .map(|b| b.key().clone())
            .collect();
        self.drain(stalled, "stalled")
    }

    /// drop every buffer, e.g. when the sending peer went away
    pub fn abort_all(&self, reason: &str) -> Vec<TransferEvent> {
        let ids: Vec<String> = self.buffers.iter().map(|b| b.key().clone()).collect();
        self.drain(ids, reason)
    }

    fn drain(&self, ids: Vec<String>, reason: &str) -> Vec<TransferEvent> {
        ids.into_iter()
            .filter_map(|id| {
                let (id, buffer) = self.buffers.remove(&id)?;
                Some(TransferEvent::Failed {
                    reason: format!(
                        "{} with {}/{} chunks received",
                        reason,
                        buffer.received(),
                        buffer.total
                    ),
                    id,
                })
            })
            .collect()
    }
}

/// send announcement, every chunk and the completion frame for `file`
///
/// `on_progress` is called after each chunk with the sender side percentage.
pub async fn send_file<F>(
    channel: &dyn DataChannel,
    file: &SharedFile,
    chunk_size: usize,
    mut on_progress: F,
) -> Result<usize, TransferError>
where
    F: FnMut(u8) + Send,
{
    let data = file
        .data
        .as_ref()
        .ok_or_else(|| TransferError::NoData(file.id.clone()))?;

    let chunks = chunk_payload(&file.id, data, chunk_size)?;
    let total = chunks.len();

    let announce = TransferMessage::FileInfo(FileAnnouncement {
        id: file.id.clone(),
        name: file.name.clone(),
        size: file.size,
        file_type: file.mime_type.clone(),
    });
    channel.send(announce.encode()?).await?;

    for (index, chunk) in chunks.into_iter().enumerate() {
        channel.send(chunk.encode()?).await?;
        on_progress(progress_percent(index + 1, total));
    }

    channel
        .send(
            TransferMessage::FileComplete {
                id: file.id.clone(),
            }
            .encode()?,
        )
        .await?;

    tracing::info!("📤 Sent {} in {} chunks", file.name, total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_CHUNK_SIZE;

    fn frames_for(id: &str, payload: &[u8], chunk_size: usize) -> Vec<TransferMessage> {
        chunk_payload(id, payload, chunk_size).unwrap()
    }

    fn announce(id: &str, size: u64) -> TransferMessage {
        TransferMessage::FileInfo(FileAnnouncement {
            id: id.to_string(),
            name: "data.bin".to_string(),
            size,
            file_type: "application/octet-stream".to_string(),
        })
    }

    fn completed(events: &[TransferEvent]) -> Option<Bytes> {
        events.iter().find_map(|e| match e {
            TransferEvent::Completed { data, .. } => Some(data.clone()),
            _ => None,
        })
    }

    #[test]
    fn in_order_transfer_reassembles_payload() {
        let payload: Vec<u8> = (0..40 * 1024).map(|i| (i % 251) as u8).collect();
        let rx = Reassembler::new();

        assert!(matches!(
            rx.apply(announce("f", payload.len() as u64)).as_slice(),
            [TransferEvent::Announced(_)]
        ));

        let mut percents = Vec::new();
        for frame in frames_for("f", &payload, DEFAULT_CHUNK_SIZE) {
            for event in rx.apply(frame) {
                if let TransferEvent::Progress { percent, .. } = event {
                    percents.push(percent);
                }
            }
        }
        assert_eq!(percents, vec![33, 67, 100]);

        let events = rx.apply(TransferMessage::FileComplete { id: "f".into() });
        let data = completed(&events).unwrap();
        assert_eq!(data.len(), 40 * 1024);
        assert_eq!(&data[..], &payload[..]);
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn shuffled_and_duplicated_chunks_still_reassemble() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut frames = frames_for("f", &payload, 64);
        // reverse order plus a duplicate of every third frame
        frames.reverse();
        let dups: Vec<_> = frames.iter().step_by(3).cloned().collect();
        frames.extend(dups);

        let rx = Reassembler::new();
        rx.apply(announce("f", payload.len() as u64));

        let mut last = 0u8;
        for frame in frames {
            for event in rx.apply(frame) {
                if let TransferEvent::Progress {
                    received,
                    total,
                    percent,
                    ..
                } = event
                {
                    assert!(percent >= last);
                    assert!(received <= total);
                    assert_eq!(percent, progress_percent(received, total));
                    last = percent;
                }
            }
        }

        let data = completed(&rx.apply(TransferMessage::FileComplete { id: "f".into() })).unwrap();
        assert_eq!(&data[..], &payload[..]);
    }

    #[test]
    fn duplicate_chunk_emits_nothing() {
        let rx = Reassembler::new();
        let frames = frames_for("f", b"abcdef", 2);
        assert_eq!(rx.apply(frames[0].clone()).len(), 1);
        assert!(rx.apply(frames[0].clone()).is_empty());
        assert_eq!(rx.counts("f"), Some((1, 3)));
    }

    #[test]
    fn early_completion_does_not_finish() {
        let rx = Reassembler::new();
        rx.apply(announce("f", 6));
        let frames = frames_for("f", b"abcdef", 2);
        rx.apply(frames[0].clone());

        let events = rx.apply(TransferMessage::FileComplete { id: "f".into() });
        assert_eq!(
            events,
            vec![TransferEvent::Incomplete {
                id: "f".into(),
                received: 1,
                total: 3
            }]
        );
        assert_eq!(rx.in_flight(), 1);

        // late chunks finish the pending completion
        rx.apply(frames[2].clone());
        let events = rx.apply(frames[1].clone());
        assert_eq!(completed(&events).unwrap(), Bytes::from_static(b"abcdef"));
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn completion_before_any_chunk_waits() {
        let rx = Reassembler::new();
        rx.apply(announce("f", 6));
        let events = rx.apply(TransferMessage::FileComplete { id: "f".into() });
        assert!(matches!(events.as_slice(), [TransferEvent::Incomplete { .. }]));

        let mut last = Vec::new();
        for frame in frames_for("f", b"abcdef", 2) {
            last = rx.apply(frame);
        }
        assert_eq!(completed(&last).unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[test]
    fn empty_file_completes_without_chunks() {
        let rx = Reassembler::new();
        rx.apply(announce("f", 0));
        let data = completed(&rx.apply(TransferMessage::FileComplete { id: "f".into() })).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn out_of_range_chunk_fails_the_transfer() {
        let rx = Reassembler::new();
        rx.apply(announce("f", 4));
        let events = rx.apply(TransferMessage::FileChunk(FileChunk {
            id: "f".into(),
            chunk_index: 5,
            total_chunks: 2,
            data: vec![1],
        }));
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { id, .. }] if id == "f"));
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn changing_total_fails_the_transfer() {
        let rx = Reassembler::new();
        let frames = frames_for("f", b"abcd", 2);
        rx.apply(frames[0].clone());
        let events = rx.apply(TransferMessage::FileChunk(FileChunk {
            id: "f".into(),
            chunk_index: 1,
            total_chunks: 4,
            data: vec![1],
        }));
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { .. }]));
    }

    #[test]
    fn malformed_frames_surface_as_failures() {
        let rx = Reassembler::new();
        rx.apply(announce("f", 4));

        let events = rx.handle_frame(r#"{"type":"file-chunk","id":"f","chunkIndex":"x"}"#);
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { id, .. }] if id == "f"));

        let events = rx.handle_frame("garbage");
        assert!(matches!(events.as_slice(), [TransferEvent::Rejected { .. }]));
    }

    #[test]
    fn completion_for_unknown_file_fails() {
        let rx = Reassembler::new();
        let events = rx.apply(TransferMessage::FileComplete { id: "nope".into() });
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { .. }]));
    }

    #[test]
    fn stalled_buffers_are_swept() {
        let rx = Reassembler::new();
        rx.apply(announce("f", 4));
        assert!(rx.sweep_stalled(Duration::from_secs(3600)).is_empty());
        let events = rx.sweep_stalled(Duration::ZERO);
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { id, .. }] if id == "f"));
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn legacy_single_frame_completes() {
        let rx = Reassembler::new();
        let events = rx.handle_frame(r#"{"type":"file-data","id":"f","data":[104,105]}"#);
        assert_eq!(completed(&events).unwrap(), Bytes::from_static(b"hi"));
    }

    #[test]
    fn absurd_chunk_count_fails_without_allocating() {
        let rx = Reassembler::new();
        let events = rx.handle_frame(
            r#"{"type":"file-chunk","id":"f1","chunkIndex":0,"totalChunks":1152921504606846976,"data":[1]}"#,
        );
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { id, reason }]
            if id == "f1" && reason.contains("exceeds the limit")));
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn chunk_count_must_fit_the_announced_size() {
        let rx = Reassembler::new();
        rx.apply(announce("f", 4));
        // more chunks than bytes
        let events = rx.apply(TransferMessage::FileChunk(FileChunk {
            id: "f".into(),
            chunk_index: 0,
            total_chunks: 5000,
            data: vec![1],
        }));
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { .. }]));

        // too few chunks to carry a large announcement
        rx.apply(announce("g", 10 * MAX_CHUNK_SIZE as u64));
        let events = rx.apply(TransferMessage::FileChunk(FileChunk {
            id: "g".into(),
            chunk_index: 0,
            total_chunks: 2,
            data: vec![1],
        }));
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { id, .. }] if id == "g"));
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn bytes_beyond_the_announced_size_fail() {
        let rx = Reassembler::new();
        rx.apply(announce("f", 3));
        assert_eq!(
            rx.apply(TransferMessage::FileChunk(FileChunk {
                id: "f".into(),
                chunk_index: 0,
                total_chunks: 2,
                data: vec![1, 2],
            }))
            .len(),
            1
        );
        let events = rx.apply(TransferMessage::FileChunk(FileChunk {
            id: "f".into(),
            chunk_index: 1,
            total_chunks: 2,
            data: vec![3, 4],
        }));
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { reason, .. }]
            if reason.contains("exceed")));
    }

    #[test]
    fn oversized_chunks_and_files_are_refused() {
        let rx = Reassembler::with_limits(TransferLimits {
            max_chunk_size: 4,
            max_file_size: 8,
        });
        let events = rx.apply(TransferMessage::FileChunk(FileChunk {
            id: "f".into(),
            chunk_index: 0,
            total_chunks: 1,
            data: vec![0; 5],
        }));
        assert!(matches!(
            events.as_slice(),
            [TransferEvent::Failed { reason, .. }] if reason.starts_with("invalid chunk for f")
        ));

        let events = rx.apply(announce("big", 9));
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { id, .. }] if id == "big"));

        let events = rx.handle_frame(r#"{"type":"file-data","id":"d","data":[1,2,3,4,5,6,7,8,9]}"#);
        assert!(matches!(events.as_slice(), [TransferEvent::Failed { .. }]));
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn abort_all_fails_every_buffer() {
        let rx = Reassembler::new();
        rx.apply(announce("a", 4));
        rx.apply(announce("b", 4));
        let events = rx.abort_all("peer disconnected");
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, TransferEvent::Failed { reason, .. } if reason.starts_with("peer disconnected"))));
        assert_eq!(rx.in_flight(), 0);
    }
}
