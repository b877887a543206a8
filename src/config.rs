use std::net::IpAddr;

use crate::protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// longest file lifetime accepted from FILE_TTL_HOURS (one year)
pub const MAX_FILE_TTL_HOURS: i64 = 24 * 365;

const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent";

/// which upstream the assistant relay talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantProvider {
    /// Gemini `generateContent` with an api key
    Gemini,
    /// another `{messages}` -> `{response}` relay
    Relay,
}

/// how peer data channels are established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTransportKind {
    Tcp,
    Memory,
}

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// api listen address
    pub host: String,
    /// api listen port
    pub port: u16,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// maximum upload size in bytes
    pub max_upload_size: usize,
    /// bytes per transfer chunk
    pub chunk_size: usize,
    /// how long shared files live
    pub file_ttl_hours: i64,
    /// prefix for download urls of local files
    pub public_base_url: String,
    pub assistant_provider: AssistantProvider,
    pub assistant_endpoint: String,
    pub assistant_api_key: Option<String>,
    pub assistant_timeout_secs: u64,
    pub peer_transport: PeerTransportKind,
    /// cors allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
    /// rate limit: requests replenished per second
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    /// in-flight transfers idle longer than this are failed
    pub stall_timeout_secs: u64,
    /// offers without an answer are dropped after this long
    pub offer_timeout_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env_or("PORT", 4848u16);

        let assistant_api_key = std::env::var("ASSISTANT_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        let assistant_provider = match std::env::var("ASSISTANT_PROVIDER").as_deref() {
            Ok("relay") => AssistantProvider::Relay,
            _ => AssistantProvider::Gemini,
        };
        if assistant_provider == AssistantProvider::Gemini && assistant_api_key.is_none() {
            tracing::warn!("⚠️  No ASSISTANT_API_KEY set! Chat will answer with the fallback message");
        }

        let peer_transport = match std::env::var("PEER_TRANSPORT").as_deref() {
            Ok("memory") => PeerTransportKind::Memory,
            _ => PeerTransportKind::Tcp,
        };

        // parse cors origins
        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://{}:{}/api/files", host, port)),
            host,
            port,
            worker_threads: env_or("WORKER_THREADS", 8),
            max_upload_size: env_or("MAX_UPLOAD_SIZE", 100 * 1024 * 1024),
            chunk_size: env_or("CHUNK_SIZE", DEFAULT_CHUNK_SIZE).clamp(1, MAX_CHUNK_SIZE),
            file_ttl_hours: env_or("FILE_TTL_HOURS", 24i64).clamp(1, MAX_FILE_TTL_HOURS),
            assistant_provider,
            assistant_endpoint: std::env::var("ASSISTANT_ENDPOINT")
                .unwrap_or_else(|_| GEMINI_ENDPOINT.to_string()),
            assistant_api_key,
            assistant_timeout_secs: env_or("ASSISTANT_TIMEOUT_SECS", 30),
            peer_transport,
            cors_origins,
            rate_limit_per_second: env_or("RATE_LIMIT_PER_SECOND", 2),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", 60),
            stall_timeout_secs: env_or("STALL_TIMEOUT_SECS", 60),
            offer_timeout_secs: env_or("OFFER_TIMEOUT_SECS", 300),
        }
    }

    /// ip the api and tcp peer transport bind to
    pub fn bind_ip(&self) -> IpAddr {
        self.host
            .parse()
            .unwrap_or(IpAddr::from([127, 0, 0, 1]))
    }
}
