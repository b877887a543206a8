//! Out-of-band exchange of connection descriptors.
//!
//! There is no signaling server. An initiator produces an offer, the user
//! carries it to the other side (clipboard, chat, anything), and the answer
//! travels back the same way. [`SignalingChannel`] is the seam where a relay
//! server or socket rendezvous could be plugged in instead.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::PeerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
        }
    }
}

/// session descriptor produced by one peer for the other
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// session token of the peer that produced the descriptor
    pub peer_id: String,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// transport specific connection data
    pub payload: serde_json::Value,
}

impl SessionDescriptor {
    /// connection code the user copies to the other side
    pub fn to_code(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// parse a pasted connection code
    pub fn from_code(code: &str) -> Result<Self, PeerError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(PeerError::InvalidSignal("empty connection code".to_string()));
        }
        serde_json::from_str(code).map_err(|e| PeerError::InvalidSignal(e.to_string()))
    }
}

/// publish / fetch rendezvous for descriptors
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn publish(&self, descriptor: SessionDescriptor) -> Result<(), PeerError>;

    async fn fetch(&self, peer_id: &str, kind: SignalKind) -> Result<SessionDescriptor, PeerError>;
}

/// in-memory mailbox standing in for manual copy/paste
#[derive(Debug, Default)]
pub struct ManualSignaling {
    mailbox: DashMap<(String, SignalKind), SessionDescriptor>,
}

impl ManualSignaling {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalingChannel for ManualSignaling {
    async fn publish(&self, descriptor: SessionDescriptor) -> Result<(), PeerError> {
        tracing::debug!("Published {} for {}", descriptor.kind, descriptor.peer_id);
        self.mailbox
            .insert((descriptor.peer_id.clone(), descriptor.kind), descriptor);
        Ok(())
    }

    async fn fetch(&self, peer_id: &str, kind: SignalKind) -> Result<SessionDescriptor, PeerError> {
        self.mailbox
            .remove(&(peer_id.to_string(), kind))
            .map(|(_, d)| d)
            .ok_or_else(|| PeerError::SignalNotFound {
                peer_id: peer_id.to_string(),
                kind: kind.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> SessionDescriptor {
        SessionDescriptor {
            peer_id: "k3j9x0ab".into(),
            kind: SignalKind::Offer,
            payload: serde_json::json!({ "session": "s1" }),
        }
    }

    #[test]
    fn connection_code_round_trips() {
        let code = offer().to_code();
        assert!(code.contains(r#""type":"offer""#));
        assert_eq!(SessionDescriptor::from_code(&code).unwrap(), offer());
    }

    #[test]
    fn bad_codes_are_reported() {
        assert!(matches!(
            SessionDescriptor::from_code("  "),
            Err(PeerError::InvalidSignal(_))
        ));
        assert!(matches!(
            SessionDescriptor::from_code("{not json"),
            Err(PeerError::InvalidSignal(_))
        ));
    }

    #[tokio::test]
    async fn mailbox_hands_out_each_descriptor_once() {
        let signaling = ManualSignaling::new();
        signaling.publish(offer()).await.unwrap();

        assert!(signaling.fetch("k3j9x0ab", SignalKind::Answer).await.is_err());
        assert_eq!(signaling.fetch("k3j9x0ab", SignalKind::Offer).await.unwrap(), offer());
        assert!(signaling.fetch("k3j9x0ab", SignalKind::Offer).await.is_err());
    }
}
