use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::{AssistantProvider, Config, PeerTransportKind};
use crate::desktop::Desktop;
use crate::error::RelayError;
use crate::files::FileStore;
use crate::node::PeerNode;
use crate::relay::{Assistant, GeminiClient, RelayClient};
use crate::transfer::TransferLimits;
use crate::transport::{MemoryTransport, PeerTransport, TcpTransport};

/// shared application state
#[derive(Clone)]
pub struct AppState {
    pub files: Arc<FileStore>,
    pub node: Arc<PeerNode>,
    pub assistant: Arc<dyn Assistant>,
    pub desktop: Arc<Mutex<Desktop>>,
}

impl AppState {
    /// wire up the state from explicit parts
    pub fn new(files: Arc<FileStore>, node: Arc<PeerNode>, assistant: Arc<dyn Assistant>) -> Self {
        Self {
            files,
            node,
            assistant,
            desktop: Arc::new(Mutex::new(Desktop::new())),
        }
    }

    /// build everything the config describes
    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        let files = Arc::new(FileStore::new(
            chrono::Duration::hours(config.file_ttl_hours),
            config.public_base_url.clone(),
        ));

        let transport: Arc<dyn PeerTransport> = match config.peer_transport {
            PeerTransportKind::Tcp => Arc::new(TcpTransport::new(config.bind_ip())),
            PeerTransportKind::Memory => Arc::new(MemoryTransport::new()),
        };
        let node = Arc::new(
            PeerNode::new(transport, files.clone(), config.chunk_size).with_limits(TransferLimits {
                max_file_size: config.max_upload_size as u64,
                ..TransferLimits::default()
            }),
        );

        let timeout = Duration::from_secs(config.assistant_timeout_secs);
        let assistant: Arc<dyn Assistant> = match config.assistant_provider {
            AssistantProvider::Gemini => Arc::new(GeminiClient::new(
                config.assistant_endpoint.clone(),
                config.assistant_api_key.clone(),
                timeout,
            )?),
            AssistantProvider::Relay => {
                Arc::new(RelayClient::new(config.assistant_endpoint.clone(), timeout)?)
            }
        };

        Ok(Self::new(files, node, assistant))
    }
}
