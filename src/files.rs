use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::protocol::FileAnnouncement;
use crate::utils::generate_file_id;

/// lifecycle of a shared file record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Uploading,
    Downloading,
    Completed,
    Failed,
}

impl TransferStatus {
    /// progress a record holds when it enters this status
    fn initial_progress(self) -> u8 {
        match self {
            TransferStatus::Completed => 100,
            _ => 0,
        }
    }
}

/// where a record came from; only the sending peer may touch an incoming one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOrigin {
    Local,
    Peer(String),
}

/// a file known to this session, local or received from a peer
#[derive(Debug, Clone, Serialize)]
pub struct SharedFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub status: TransferStatus,
    pub progress: u8,
    #[serde(skip)]
    pub origin: FileOrigin,
    #[serde(skip)]
    pub data: Option<Bytes>,
}

impl SharedFile {
    pub fn is_from(&self, peer_id: &str) -> bool {
        matches!(&self.origin, FileOrigin::Peer(p) if p == peer_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// remaining lifetime as shown in the file list
    pub fn remaining_time(&self, now: DateTime<Utc>) -> String {
        let remaining = self.expires_at - now;
        if remaining <= Duration::zero() {
            return "Expired".to_string();
        }
        let hours = remaining.num_hours();
        let minutes = remaining.num_minutes() % 60;
        format!("{}h {}m remaining", hours, minutes)
    }

    fn enter(&mut self, status: TransferStatus) {
        self.status = status;
        self.progress = status.initial_progress();
    }
}

/// count and byte total of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_files: usize,
    pub total_size: u64,
}

/// in-memory registry of shared files keyed by id
#[derive(Debug)]
pub struct FileStore {
    files: DashMap<String, SharedFile>,
    ttl: Duration,
    public_base_url: String,
}

impl FileStore {
    pub fn new(ttl: Duration, public_base_url: impl Into<String>) -> Self {
        Self {
            files: DashMap::new(),
            ttl,
            public_base_url: public_base_url.into(),
        }
    }

    /// store bytes selected locally; they are immediately available to send
    pub fn add_local(&self, name: &str, mime_type: &str, data: Bytes) -> SharedFile {
        let id = generate_file_id();
        let file = SharedFile {
            url: format!("{}/{}", self.public_base_url.trim_end_matches('/'), id),
            id: id.clone(),
            name: name.to_string(),
            size: data.len() as u64,
            mime_type: mime_type.to_string(),
            expires_at: Utc::now() + self.ttl,
            status: TransferStatus::Completed,
            progress: 100,
            origin: FileOrigin::Local,
            data: Some(data),
        };
        tracing::info!("📁 Added local file {} ({} bytes)", file.name, file.size);
        self.files.insert(id, file.clone());
        file
    }

    /// Creates the downloading record for `peer_id`'s announcement.
    ///
    /// An id held by a local file or by another peer's transfer is refused
    /// and `None` comes back; the same peer may announce an id again.
    pub fn register_incoming(
        &self,
        peer_id: &str,
        announce: &FileAnnouncement,
    ) -> Option<SharedFile> {
        let file = SharedFile {
            id: announce.id.clone(),
            name: announce.name.clone(),
            size: announce.size,
            mime_type: announce.file_type.clone(),
            url: format!("p2p://{}", announce.id),
            expires_at: Utc::now() + self.ttl,
            status: TransferStatus::Downloading,
            progress: 0,
            origin: FileOrigin::Peer(peer_id.to_string()),
            data: None,
        };
        match self.files.entry(file.id.clone()) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_from(peer_id) {
                    tracing::warn!("Peer {} announced {} which is already in use", peer_id, file.id);
                    return None;
                }
                slot.insert(file.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(file.clone());
            }
        }
        tracing::debug!("Registered incoming file {} ({})", file.name, file.id);
        Some(file)
    }

    /// whether `id` is an incoming file sent by `peer_id`
    pub fn is_incoming_from(&self, id: &str, peer_id: &str) -> bool {
        self.files.get(id).is_some_and(|f| f.is_from(peer_id))
    }

    /// fail a download from `peer_id`; anything else is left alone
    pub fn fail_incoming(&self, id: &str, peer_id: &str) -> bool {
        match self.files.get_mut(id) {
            Some(mut file) if file.is_from(peer_id) && file.status == TransferStatus::Downloading => {
                file.enter(TransferStatus::Failed);
                true
            }
            _ => false,
        }
    }

    /// raise progress; lower values are ignored so progress never goes back
    pub fn set_progress(&self, id: &str, percent: u8) -> Option<u8> {
        let mut file = self.files.get_mut(id)?;
        let percent = percent.min(100);
        if percent > file.progress {
            file.progress = percent;
        }
        Some(file.progress)
    }

    pub fn mark_uploading(&self, id: &str) -> bool {
        self.transition(id, TransferStatus::Uploading)
    }

    pub fn mark_failed(&self, id: &str) -> bool {
        self.transition(id, TransferStatus::Failed)
    }

    /// attach the received bytes and finish the record
    pub fn mark_completed(&self, id: &str, data: Bytes) -> bool {
        match self.files.get_mut(id) {
            Some(mut file) => {
                file.enter(TransferStatus::Completed);
                file.data = Some(data);
                true
            }
            None => false,
        }
    }

    /// finish an outgoing transfer, keeping the local bytes
    pub fn mark_sent(&self, id: &str) -> bool {
        self.transition(id, TransferStatus::Completed)
    }

    fn transition(&self, id: &str, status: TransferStatus) -> bool {
        match self.files.get_mut(id) {
            Some(mut file) => {
                tracing::trace!("File {} {:?} -> {:?}", id, file.status, status);
                file.enter(status);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<SharedFile> {
        self.files.get(id).map(|f| f.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.files.contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<SharedFile> {
        self.files.remove(id).map(|(_, f)| f)
    }

    /// snapshot of the live files, soonest expiry first
    pub fn list(&self) -> Vec<SharedFile> {
        let now = Utc::now();
        let mut files: Vec<SharedFile> = self
            .files
            .iter()
            .filter(|f| !f.is_expired(now))
            .map(|f| f.clone())
            .collect();
        files.sort_by_key(|f| f.expires_at);
        files
    }

    pub fn stats(&self) -> StoreStats {
        self.files.iter().fold(StoreStats::default(), |mut acc, f| {
            acc.total_files += 1;
            acc.total_size += f.size;
            acc
        })
    }

    /// drop every record expired at `now`, returning how many went
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.files.len();
        self.files.retain(|_, f| !f.is_expired(now));
        let purged = before - self.files.len();
        if purged > 0 {
            tracing::info!("🧹 Purged {} expired files", purged);
        }
        purged
    }
}
