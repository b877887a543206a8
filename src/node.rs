//! Local peer endpoint: connection handshake, per-peer readers and file sends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use crate::channel::DataChannel;
use crate::error::{PeerError, TransferError};
use crate::files::FileStore;
use crate::peer::{PeerConnection, PeerRegistry, PeerRole, PeerState, PeerSummary};
use crate::protocol::FileAnnouncement;
use crate::signaling::{SessionDescriptor, SignalKind, SignalingChannel};
use crate::transfer::{self, Reassembler, TransferEvent, TransferLimits};
use crate::transport::PeerTransport;
use crate::utils::generate_session_token;

/// capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 1024;

/// something observers of the node may want to react to
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    Connected { peer_id: String },
    Disconnected { peer_id: String, reason: Option<String> },
    Progress { file_id: String, percent: u8 },
    FileReceived { file_id: String, size: usize },
    FileSent { file_id: String, peer_id: String, chunks: usize },
    TransferFailed { file_id: String, reason: String },
    Error { message: String },
}

/// this session's endpoint in the peer network
#[derive(Debug)]
pub struct PeerNode {
    local_id: String,
    registry: PeerRegistry,
    transport: Arc<dyn PeerTransport>,
    files: Arc<FileStore>,
    /// one reassembler per sending peer so ids from different peers never mix
    reassemblers: DashMap<String, Arc<Reassembler>>,
    limits: TransferLimits,
    chunk_size: usize,
    events: broadcast::Sender<NodeEvent>,
    readers: DashMap<String, AbortHandle>,
    last_error: Mutex<Option<String>>,
}

impl PeerNode {
    pub fn new(transport: Arc<dyn PeerTransport>, files: Arc<FileStore>, chunk_size: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let local_id = generate_session_token();
        tracing::info!("🔗 Peer node ready with id {}", local_id);
        Self {
            local_id,
            registry: PeerRegistry::new(),
            transport,
            files,
            reassemblers: DashMap::new(),
            limits: TransferLimits::default(),
            chunk_size,
            events,
            readers: DashMap::new(),
            last_error: Mutex::new(None),
        }
    }

    /// bounds applied to files received from peers
    pub fn with_limits(mut self, limits: TransferLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn peers(&self) -> Vec<PeerSummary> {
        self.registry.list()
    }

    pub fn peer(&self, id: &str) -> Option<PeerSummary> {
        self.registry.get(id)
    }

    pub fn connected_count(&self) -> usize {
        self.registry.connected_count()
    }

    /// last error surfaced to the user, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    fn record_error(&self, message: String) {
        tracing::warn!("⚠️  {}", message);
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(message.clone());
        }
        self.emit(NodeEvent::Error { message });
    }

    fn clear_error(&self) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = None;
        }
    }

    fn emit(&self, event: NodeEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// start a connection as initiator and return the offer to hand over
    pub async fn initiate(&self, target: &str) -> Result<SessionDescriptor, PeerError> {
        let target = target.trim();
        if target.is_empty() {
            let err = PeerError::InvalidSignal("a peer id is required to connect".to_string());
            self.record_error(err.to_string());
            return Err(err);
        }
        self.clear_error();

        self.registry
            .insert(PeerConnection::new(target, PeerRole::Initiator))?;
        self.registry.transition(target, PeerState::Signaling)?;

        let offer = match self.transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.abandon(target, e)),
        };
        self.registry.set_session(target, offer.session)?;

        tracing::info!("📨 Offer created for {}", target);
        Ok(SessionDescriptor {
            peer_id: self.local_id.clone(),
            kind: SignalKind::Offer,
            payload: offer.payload,
        })
    }

    /// respond to a pasted offer; returns the answer for the initiator
    pub async fn accept(self: &Arc<Self>, code: &str) -> Result<SessionDescriptor, PeerError> {
        self.clear_error();
        let offer = SessionDescriptor::from_code(code).inspect_err(|e| self.record_error(e.to_string()))?;
        if offer.kind != SignalKind::Offer {
            let err = PeerError::InvalidSignal(format!("expected an offer, got {}", offer.kind));
            self.record_error(err.to_string());
            return Err(err);
        }

        let remote = offer.peer_id.clone();
        self.registry
            .insert(PeerConnection::new(remote.clone(), PeerRole::Responder))?;
        self.registry.transition(&remote, PeerState::Signaling)?;
        self.registry.transition(&remote, PeerState::Connecting)?;

        let (answer, channel) = match self.transport.accept_offer(&offer.payload).await {
            Ok(accepted) => accepted,
            Err(e) => return Err(self.abandon(&remote, e)),
        };
        self.connect(&remote, channel)?;

        Ok(SessionDescriptor {
            peer_id: self.local_id.clone(),
            kind: SignalKind::Answer,
            payload: answer,
        })
    }

    /// apply the responder's answer to a pending offer
    pub async fn finish(self: &Arc<Self>, target: &str, code: &str) -> Result<(), PeerError> {
        self.clear_error();
        let answer = SessionDescriptor::from_code(code).inspect_err(|e| self.record_error(e.to_string()))?;
        if answer.kind != SignalKind::Answer {
            let err = PeerError::InvalidSignal(format!("expected an answer, got {}", answer.kind));
            self.record_error(err.to_string());
            return Err(err);
        }

        let session = self.registry.take_session(target)?;
        self.registry.transition(target, PeerState::Connecting)?;

        match self.transport.complete(&session, &answer.payload).await {
            Ok(channel) => self.connect(target, channel),
            Err(e) => {
                self.transport.cancel(&session).await;
                Err(self.abandon(target, e))
            }
        }
    }

    /// initiate and publish the offer through a signaling channel
    pub async fn offer_via(
        &self,
        target: &str,
        signaling: &dyn SignalingChannel,
    ) -> Result<(), PeerError> {
        let offer = self.initiate(target).await?;
        signaling.publish(offer).await
    }

    /// fetch `remote`'s offer, accept it and publish the answer
    pub async fn answer_via(
        self: &Arc<Self>,
        remote: &str,
        signaling: &dyn SignalingChannel,
    ) -> Result<(), PeerError> {
        let offer = signaling.fetch(remote, SignalKind::Offer).await?;
        let answer = self.accept(&offer.to_code()).await?;
        signaling.publish(answer).await
    }

    /// fetch the answer `remote` published and finish the pending offer to `target`
    pub async fn finish_via(
        self: &Arc<Self>,
        target: &str,
        remote: &str,
        signaling: &dyn SignalingChannel,
    ) -> Result<(), PeerError> {
        let answer = signaling.fetch(remote, SignalKind::Answer).await?;
        self.finish(target, &answer.to_code()).await
    }

    fn connect(self: &Arc<Self>, peer_id: &str, channel: Arc<dyn DataChannel>) -> Result<(), PeerError> {
        self.registry.attach(peer_id, channel.clone())?;
        self.spawn_reader(peer_id.to_string(), channel);
        tracing::info!("🤝 Connected to {}", peer_id);
        self.emit(NodeEvent::Connected {
            peer_id: peer_id.to_string(),
        });
        Ok(())
    }

    // drop a half-built connection and surface the error
    fn abandon(&self, peer_id: &str, error: PeerError) -> PeerError {
        self.registry.remove(peer_id);
        self.record_error(format!("connection to {} failed: {}", peer_id, error));
        error
    }

    fn spawn_reader(self: &Arc<Self>, peer_id: String, channel: Arc<dyn DataChannel>) {
        let node = Arc::clone(self);
        let id = peer_id.clone();
        let handle = tokio::spawn(async move {
            let reason = loop {
                match channel.recv().await {
                    Ok(Some(frame)) => node.handle_frame(&id, &frame),
                    Ok(None) => break None,
                    Err(e) => break Some(e.to_string()),
                }
            };
            node.drop_peer(&id, reason).await;
        });
        self.readers.insert(peer_id, handle.abort_handle());
    }

    async fn drop_peer(&self, peer_id: &str, reason: Option<String>) {
        self.readers.remove(peer_id);
        self.release_transfers(peer_id);
        if let Some(peer) = self.registry.remove(peer_id) {
            if let Some(channel) = peer.channel {
                channel.close().await;
            }
            if let Some(reason) = &reason {
                self.record_error(format!("connection to {} lost: {}", peer_id, reason));
            }
            tracing::info!("🔌 Peer {} disconnected", peer_id);
            self.emit(NodeEvent::Disconnected {
                peer_id: peer_id.to_string(),
                reason,
            });
        }
    }

    /// close the connection to a peer and forget it
    pub async fn disconnect(&self, peer_id: &str) -> Result<(), PeerError> {
        let peer = self
            .registry
            .remove(peer_id)
            .ok_or_else(|| PeerError::ConnectionNotFound(peer_id.to_string()))?;
        if let Some((_, reader)) = self.readers.remove(peer_id) {
            reader.abort();
        }
        self.release_transfers(peer_id);
        if let Some(session) = &peer.session {
            self.transport.cancel(session).await;
        }
        if let Some(channel) = peer.channel {
            channel.close().await;
        }
        tracing::info!("🔌 Disconnected from {}", peer_id);
        self.emit(NodeEvent::Disconnected {
            peer_id: peer_id.to_string(),
            reason: None,
        });
        Ok(())
    }

    /// Drops offers still waiting for an answer after `max_age`.
    ///
    /// The transport session behind each offer is released along with the
    /// registry entry. Returns how many offers expired.
    pub async fn expire_offers(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let expired = self.registry.remove_pending_offers(cutoff);
        for peer in &expired {
            if let Some(session) = &peer.session {
                self.transport.cancel(session).await;
            }
            let reason = "offer expired without an answer".to_string();
            self.record_error(format!("connection to {} failed: {}", peer.id, reason));
            self.emit(NodeEvent::Disconnected {
                peer_id: peer.id.clone(),
                reason: Some(reason),
            });
        }
        expired.len()
    }

    // fail whatever this peer was still sending us
    fn release_transfers(&self, peer_id: &str) {
        if let Some((_, reassembler)) = self.reassemblers.remove(peer_id) {
            for event in reassembler.abort_all("peer disconnected") {
                self.apply_event(peer_id, event);
            }
        }
    }

    /// disconnect every peer
    pub async fn shutdown(&self) {
        for id in self.registry.ids() {
            let _ = self.disconnect(&id).await;
        }
    }

    /// chunk and send a stored file to a connected peer
    pub async fn send_file(&self, peer_id: &str, file_id: &str) -> Result<usize, TransferError> {
        let channel = self.registry.channel_for(peer_id).inspect_err(|e| self.record_error(e.to_string()))?;
        let file = self
            .files
            .get(file_id)
            .ok_or_else(|| TransferError::FileNotFound(file_id.to_string()))?;
        if file.data.is_none() {
            return Err(TransferError::NoData(file_id.to_string()));
        }

        self.files.mark_uploading(file_id);
        let files = &self.files;
        let events = &self.events;
        let result = transfer::send_file(channel.as_ref(), &file, self.chunk_size, |percent| {
            files.set_progress(file_id, percent);
            let _ = events.send(NodeEvent::Progress {
                file_id: file_id.to_string(),
                percent,
            });
        })
        .await;

        match result {
            Ok(chunks) => {
                self.files.mark_sent(file_id);
                self.emit(NodeEvent::FileSent {
                    file_id: file_id.to_string(),
                    peer_id: peer_id.to_string(),
                    chunks,
                });
                Ok(chunks)
            }
            Err(e) => {
                self.files.mark_failed(file_id);
                self.record_error(format!("sending {} to {} failed: {}", file.name, peer_id, e));
                self.emit(NodeEvent::TransferFailed {
                    file_id: file_id.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn reassembler_for(&self, peer_id: &str) -> Arc<Reassembler> {
        self.reassemblers
            .entry(peer_id.to_string())
            .or_insert_with(|| Arc::new(Reassembler::with_limits(self.limits)))
            .clone()
    }

    /// feed one incoming frame from `peer_id` through its reassembler
    pub fn handle_frame(&self, peer_id: &str, frame: &str) {
        tracing::trace!("Frame from {} ({} bytes)", peer_id, frame.len());
        for event in self.reassembler_for(peer_id).handle_frame(frame) {
            self.apply_event(peer_id, event);
        }
    }

    /// fail transfers that have not seen a frame within `timeout`
    pub fn sweep_stalled(&self, timeout: Duration) -> usize {
        let reassemblers: Vec<(String, Arc<Reassembler>)> = self
            .reassemblers
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let mut count = 0;
        for (peer_id, reassembler) in reassemblers {
            let events = reassembler.sweep_stalled(timeout);
            count += events.len();
            for event in events {
                self.apply_event(&peer_id, event);
            }
        }
        count
    }

    // events only touch records that `peer_id` itself announced
    fn apply_event(&self, peer_id: &str, event: TransferEvent) {
        match event {
            TransferEvent::Announced(announce) => {
                if self.files.register_incoming(peer_id, &announce).is_none() {
                    if let Some(reassembler) = self.reassemblers.get(peer_id) {
                        reassembler.discard(&announce.id);
                    }
                    self.record_error(format!(
                        "refused file {} from {}: id already in use",
                        announce.id, peer_id
                    ));
                }
            }
            TransferEvent::Progress { id, percent, .. } => {
                if self.files.is_incoming_from(&id, peer_id) {
                    self.files.set_progress(&id, percent);
                    self.emit(NodeEvent::Progress {
                        file_id: id,
                        percent,
                    });
                }
            }
            TransferEvent::Completed { id, data } => {
                let owned = self.files.is_incoming_from(&id, peer_id)
                    || self
                        .files
                        .register_incoming(
                            peer_id,
                            &FileAnnouncement {
                                id: id.clone(),
                                name: id.clone(),
                                size: data.len() as u64,
                                file_type: "application/octet-stream".to_string(),
                            },
                        )
                        .is_some();
                if !owned {
                    self.record_error(format!(
                        "refused file {} from {}: id already in use",
                        id, peer_id
                    ));
                    return;
                }
                let size = data.len();
                self.files.mark_completed(&id, data);
                self.emit(NodeEvent::FileReceived { file_id: id, size });
            }
            TransferEvent::Incomplete {
                id,
                received,
                total,
            } => {
                tracing::warn!("Transfer {} completed early ({}/{})", id, received, total);
            }
            TransferEvent::Failed { id, reason } => {
                self.record_error(format!("transfer {} from {} failed: {}", id, peer_id, reason));
                if self.files.fail_incoming(&id, peer_id) {
                    self.emit(NodeEvent::TransferFailed {
                        file_id: id,
                        reason,
                    });
                }
            }
            TransferEvent::Rejected { reason } => {
                self.record_error(format!("dropped unreadable frame from {}: {}", peer_id, reason));
            }
        }
    }
}
