use thiserror::Error;

/// errors raised while encoding, decoding or sending transfer frames
#[derive(Debug, Error)]
pub enum TransferError {
    /// frame could not be parsed or has an unexpected shape
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// frame parsed but violates the chunking rules
    #[error("invalid chunk for {id}: {reason}")]
    InvalidChunk { id: String, reason: String },

    /// announced file is larger than this node accepts
    #[error("file {id} is {size} bytes, limit is {limit}")]
    TooLarge { id: String, size: u64, limit: u64 },

    /// chunk size of zero was requested
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    /// no shared file with this id
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// file has no bytes to send yet
    #[error("file {0} has no data to send")]
    NoData(String),

    /// underlying channel failed mid-transfer
    #[error("channel error: {0}")]
    Channel(#[from] PeerError),
}

/// errors raised by peer connection management
#[derive(Debug, Error)]
pub enum PeerError {
    /// no connected peer with this id
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// session token already in use by another peer entry
    #[error("peer id already in use: {0}")]
    DuplicatePeer(String),

    /// state machine refused the transition
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    /// connection code could not be parsed
    #[error("invalid connection code: {0}")]
    InvalidSignal(String),

    /// descriptor was not found in the signaling mailbox
    #[error("no {kind} descriptor published for {peer_id}")]
    SignalNotFound { peer_id: String, kind: String },

    /// remote sent a frame longer than the channel accepts
    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    /// the data channel is closed
    #[error("channel closed")]
    ChannelClosed,

    /// transport level i/o failure
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// errors raised while talking to the remote assistant
#[derive(Debug, Error)]
pub enum RelayError {
    /// network failure before a response arrived
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// upstream answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// request carried nothing to answer
    #[error("no user message in request")]
    EmptyConversation,

    /// relay is not configured with credentials
    #[error("assistant is not configured: {0}")]
    NotConfigured(String),
}

/// errors raised by desktop commands
#[derive(Debug, Error)]
pub enum DesktopError {
    /// command targets a window that is not open
    #[error("window is not open: {0}")]
    NotOpen(String),
}
