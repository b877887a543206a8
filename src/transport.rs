//! Transports that turn an offer/answer exchange into a [`DataChannel`].

use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use crate::channel::{memory_pair, DataChannel, MemoryChannel, TcpChannel};
use crate::error::PeerError;

/// how long an initiator waits for the responder to dial in
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// offer created by the initiating side
#[derive(Debug, Clone)]
pub struct Offer {
    /// key used to complete the session once the answer arrives
    pub session: String,
    /// transport specific data the responder needs
    pub payload: serde_json::Value,
}

/// a way of establishing data channels from exchanged descriptors
#[async_trait]
pub trait PeerTransport: Send + Sync + Debug {
    /// initiator: prepare a session and describe it for the remote side
    async fn create_offer(&self) -> Result<Offer, PeerError>;

    /// responder: connect using the remote offer, returning the answer payload
    async fn accept_offer(
        &self,
        offer: &serde_json::Value,
    ) -> Result<(serde_json::Value, Arc<dyn DataChannel>), PeerError>;

    /// initiator: finish the session once the answer has come back
    async fn complete(
        &self,
        session: &str,
        answer: &serde_json::Value,
    ) -> Result<Arc<dyn DataChannel>, PeerError>;

    /// release whatever an unanswered offer still holds
    async fn cancel(&self, session: &str);
}

fn session_field(payload: &serde_json::Value) -> Result<String, PeerError> {
    payload
        .get("session")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .ok_or_else(|| PeerError::InvalidSignal("descriptor has no session".to_string()))
}

/// in-process transport; both peers must share the same instance
#[derive(Debug, Default)]
pub struct MemoryTransport {
    initiators: DashMap<String, MemoryChannel>,
    responders: DashMap<String, MemoryChannel>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn create_offer(&self) -> Result<Offer, PeerError> {
        let session = Uuid::new_v4().to_string();
        let (local, remote) = memory_pair();
        self.initiators.insert(session.clone(), local);
        self.responders.insert(session.clone(), remote);
        Ok(Offer {
            payload: json!({ "transport": "memory", "session": session }),
            session,
        })
    }

    async fn accept_offer(
        &self,
        offer: &serde_json::Value,
    ) -> Result<(serde_json::Value, Arc<dyn DataChannel>), PeerError> {
        let session = session_field(offer)?;
        let (_, channel) = self
            .responders
            .remove(&session)
            .ok_or_else(|| PeerError::InvalidSignal(format!("unknown session {}", session)))?;
        let channel: Arc<dyn DataChannel> = Arc::new(channel);
        Ok((json!({ "transport": "memory", "session": session }), channel))
    }

    async fn complete(
        &self,
        session: &str,
        answer: &serde_json::Value,
    ) -> Result<Arc<dyn DataChannel>, PeerError> {
        if session_field(answer)? != session {
            return Err(PeerError::InvalidSignal(
                "answer belongs to another session".to_string(),
            ));
        }
        let (_, channel) = self
            .initiators
            .remove(session)
            .ok_or_else(|| PeerError::InvalidSignal(format!("unknown session {}", session)))?;
        Ok(Arc::new(channel))
    }

    async fn cancel(&self, session: &str) {
        self.initiators.remove(session);
        self.responders.remove(session);
    }
}

/// tcp transport: the offer carries a listening address the responder dials
#[derive(Debug)]
pub struct TcpTransport {
    bind_ip: IpAddr,
    listeners: DashMap<String, TcpListener>,
}

impl TcpTransport {
    pub fn new(bind_ip: IpAddr) -> Self {
        Self {
            bind_ip,
            listeners: DashMap::new(),
        }
    }

    /// offers still holding a listening socket
    pub fn pending(&self) -> usize {
        self.listeners.len()
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn create_offer(&self) -> Result<Offer, PeerError> {
        let listener = TcpListener::bind(SocketAddr::new(self.bind_ip, 0)).await?;
        let addr = listener.local_addr()?;
        let session = Uuid::new_v4().to_string();
        tracing::debug!("Offer {} listening on {}", session, addr);
        self.listeners.insert(session.clone(), listener);
        Ok(Offer {
            payload: json!({ "transport": "tcp", "session": session, "addr": addr.to_string() }),
            session,
        })
    }

    async fn accept_offer(
        &self,
        offer: &serde_json::Value,
    ) -> Result<(serde_json::Value, Arc<dyn DataChannel>), PeerError> {
        let session = session_field(offer)?;
        let addr: SocketAddr = offer
            .get("addr")
            .and_then(|a| a.as_str())
            .ok_or_else(|| PeerError::InvalidSignal("offer has no address".to_string()))?
            .parse()
            .map_err(|e| PeerError::InvalidSignal(format!("bad address: {}", e)))?;

        let stream = TcpStream::connect(addr).await?;
        tracing::debug!("Dialed {} for session {}", addr, session);
        let channel: Arc<dyn DataChannel> = Arc::new(TcpChannel::new(stream));
        Ok((json!({ "transport": "tcp", "session": session }), channel))
    }

    async fn complete(
        &self,
        session: &str,
        answer: &serde_json::Value,
    ) -> Result<Arc<dyn DataChannel>, PeerError> {
        if session_field(answer)? != session {
            return Err(PeerError::InvalidSignal(
                "answer belongs to another session".to_string(),
            ));
        }
        let (_, listener) = self
            .listeners
            .remove(session)
            .ok_or_else(|| PeerError::InvalidSignal(format!("unknown session {}", session)))?;

        let (stream, remote) = tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept())
            .await
            .map_err(|_| {
                PeerError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "responder never connected",
                ))
            })??;
        tracing::debug!("Accepted {} for session {}", remote, session);
        Ok(Arc::new(TcpChannel::new(stream)))
    }

    async fn cancel(&self, session: &str) {
        if self.listeners.remove(session).is_some() {
            tracing::debug!("Closed listener for abandoned session {}", session);
        }
    }
}
