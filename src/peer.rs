use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::channel::DataChannel;
use crate::error::PeerError;

/// connection lifecycle: idle -> signaling -> connecting -> connected -> disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Idle,
    Signaling,
    Connecting,
    Connected,
    Disconnected,
}

impl PeerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::Idle => "idle",
            PeerState::Signaling => "signaling",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
        }
    }

    /// whether `self -> next` is a legal step
    pub fn can_transition(self, next: PeerState) -> bool {
        use PeerState::*;
        match (self, next) {
            (Disconnected, _) => false,
            (_, Disconnected) => true,
            (Idle, Signaling) | (Signaling, Connecting) | (Connecting, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Initiator,
    Responder,
}

/// one remote peer and the channel to it
#[derive(Debug)]
pub struct PeerConnection {
    pub id: String,
    pub role: PeerRole,
    pub state: PeerState,
    /// transport session awaiting an answer (initiator only)
    pub session: Option<String>,
    pub channel: Option<Arc<dyn DataChannel>>,
    pub created_at: DateTime<Utc>,
}

impl PeerConnection {
    pub fn new(id: impl Into<String>, role: PeerRole) -> Self {
        Self {
            id: id.into(),
            role,
            state: PeerState::Idle,
            session: None,
            channel: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected && self.channel.is_some()
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id.clone(),
            role: self.role,
            state: self.state,
            connected: self.is_connected(),
            created_at: self.created_at,
        }
    }
}

/// read-only view of a peer for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerSummary {
    pub id: String,
    pub role: PeerRole,
    pub state: PeerState,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
}

/// active peers keyed by session token
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, PeerConnection>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a peer; a token already in use is refused
    pub fn insert(&self, peer: PeerConnection) -> Result<(), PeerError> {
        match self.peers.entry(peer.id.clone()) {
            Entry::Occupied(_) => Err(PeerError::DuplicatePeer(peer.id)),
            Entry::Vacant(slot) => {
                slot.insert(peer);
                Ok(())
            }
        }
    }

    /// move a peer to `next`, validating the step
    pub fn transition(&self, id: &str, next: PeerState) -> Result<(), PeerError> {
        let mut peer = self
            .peers
            .get_mut(id)
            .ok_or_else(|| PeerError::ConnectionNotFound(id.to_string()))?;
        if !peer.state.can_transition(next) {
            return Err(PeerError::InvalidTransition {
                id: id.to_string(),
                from: peer.state.as_str(),
                to: next.as_str(),
            });
        }
        tracing::debug!("Peer {} {} -> {}", id, peer.state, next);
        peer.state = next;
        Ok(())
    }

    pub fn set_session(&self, id: &str, session: String) -> Result<(), PeerError> {
        let mut peer = self
            .peers
            .get_mut(id)
            .ok_or_else(|| PeerError::ConnectionNotFound(id.to_string()))?;
        peer.session = Some(session);
        Ok(())
    }

    /// take the pending transport session of an initiator
    pub fn take_session(&self, id: &str) -> Result<String, PeerError> {
        let mut peer = self
            .peers
            .get_mut(id)
            .ok_or_else(|| PeerError::ConnectionNotFound(id.to_string()))?;
        peer.session
            .take()
            .ok_or_else(|| PeerError::InvalidSignal(format!("{} has no pending offer", id)))
    }

    /// attach the channel and mark the peer connected
    pub fn attach(&self, id: &str, channel: Arc<dyn DataChannel>) -> Result<(), PeerError> {
        self.transition(id, PeerState::Connected)?;
        if let Some(mut peer) = self.peers.get_mut(id) {
            peer.channel = Some(channel);
        }
        Ok(())
    }

    /// channel to a connected peer
    pub fn channel_for(&self, id: &str) -> Result<Arc<dyn DataChannel>, PeerError> {
        self.peers
            .get(id)
            .filter(|p| p.is_connected())
            .and_then(|p| p.channel.clone())
            .ok_or_else(|| PeerError::ConnectionNotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<PeerSummary> {
        self.peers.get(id).map(|p| p.summary())
    }

    /// remove a peer, returning it in the disconnected state
    pub fn remove(&self, id: &str) -> Option<PeerConnection> {
        self.peers.remove(id).map(|(_, mut peer)| {
            peer.state = PeerState::Disconnected;
            peer
        })
    }

    /// remove initiators still signaling since before `cutoff`
    pub fn remove_pending_offers(&self, cutoff: DateTime<Utc>) -> Vec<PeerConnection> {
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|p| p.state == PeerState::Signaling && p.created_at <= cutoff)
            .map(|p| p.key().clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| {
                self.peers
                    .remove_if(&id, |_, p| p.state == PeerState::Signaling)
                    .map(|(_, mut peer)| {
                        peer.state = PeerState::Disconnected;
                        peer
                    })
            })
            .collect()
    }

    pub fn list(&self) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self.peers.iter().map(|p| p.summary()).collect();
        peers.sort_by_key(|p| p.created_at);
        peers
    }

    pub fn connected_count(&self) -> usize {
        self.peers.iter().filter(|p| p.is_connected()).count()
    }

    pub fn ids(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory_pair;

    #[test]
    fn state_machine_follows_the_handshake() {
        use PeerState::*;
        assert!(Idle.can_transition(Signaling));
        assert!(Signaling.can_transition(Connecting));
        assert!(Connecting.can_transition(Connected));
        assert!(Connected.can_transition(Disconnected));
        assert!(Idle.can_transition(Disconnected));

        assert!(!Idle.can_transition(Connected));
        assert!(!Connected.can_transition(Signaling));
        assert!(!Disconnected.can_transition(Idle));
        assert!(!Disconnected.can_transition(Disconnected));
    }

    #[test]
    fn duplicate_tokens_are_refused() {
        let registry = PeerRegistry::new();
        registry.insert(PeerConnection::new("abc", PeerRole::Initiator)).unwrap();
        let err = registry
            .insert(PeerConnection::new("abc", PeerRole::Responder))
            .unwrap_err();
        assert!(matches!(err, PeerError::DuplicatePeer(id) if id == "abc"));
    }

    #[test]
    fn invalid_transition_is_reported() {
        let registry = PeerRegistry::new();
        registry.insert(PeerConnection::new("abc", PeerRole::Initiator)).unwrap();
        let err = registry.transition("abc", PeerState::Connected).unwrap_err();
        assert!(matches!(
            err,
            PeerError::InvalidTransition { from: "idle", to: "connected", .. }
        ));
    }

    #[test]
    fn only_connected_peers_hand_out_channels() {
        let registry = PeerRegistry::new();
        registry.insert(PeerConnection::new("abc", PeerRole::Initiator)).unwrap();
        assert!(matches!(
            registry.channel_for("abc"),
            Err(PeerError::ConnectionNotFound(_))
        ));

        registry.transition("abc", PeerState::Signaling).unwrap();
        registry.transition("abc", PeerState::Connecting).unwrap();
        let (a, _b) = memory_pair();
        registry.attach("abc", Arc::new(a)).unwrap();
        assert!(registry.channel_for("abc").is_ok());
        assert_eq!(registry.connected_count(), 1);

        let removed = registry.remove("abc").unwrap();
        assert_eq!(removed.state, PeerState::Disconnected);
        assert!(matches!(
            registry.channel_for("abc"),
            Err(PeerError::ConnectionNotFound(_))
        ));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn only_stale_signaling_peers_are_expired() {
        let registry = PeerRegistry::new();
        registry.insert(PeerConnection::new("waiting", PeerRole::Initiator)).unwrap();
        registry.transition("waiting", PeerState::Signaling).unwrap();
        registry.set_session("waiting", "s1".to_string()).unwrap();
        registry.insert(PeerConnection::new("idle", PeerRole::Initiator)).unwrap();

        assert!(registry
            .remove_pending_offers(Utc::now() - chrono::Duration::hours(1))
            .is_empty());

        let expired = registry.remove_pending_offers(Utc::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "waiting");
        assert_eq!(expired[0].session.as_deref(), Some("s1"));
        assert_eq!(expired[0].state, PeerState::Disconnected);
        assert_eq!(registry.ids(), vec!["idle".to_string()]);
    }
}
