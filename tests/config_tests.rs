use neural_desk::config::{AssistantProvider, Config, PeerTransportKind, MAX_FILE_TTL_HOURS};
use neural_desk::protocol::MAX_CHUNK_SIZE;
use std::env;

const VARS: [&str; 18] = [
    "HOST",
    "PORT",
    "WORKER_THREADS",
    "MAX_UPLOAD_SIZE",
    "CHUNK_SIZE",
    "FILE_TTL_HOURS",
    "PUBLIC_BASE_URL",
    "ASSISTANT_PROVIDER",
    "ASSISTANT_ENDPOINT",
    "ASSISTANT_API_KEY",
    "GEMINI_API_KEY",
    "ASSISTANT_TIMEOUT_SECS",
    "PEER_TRANSPORT",
    "CORS_ORIGINS",
    "RATE_LIMIT_PER_SECOND",
    "RATE_LIMIT_BURST",
    "STALL_TIMEOUT_SECS",
    "OFFER_TIMEOUT_SECS",
];

// helper to clear env vars
fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_config_behavior() {
    // Run these sequentially to avoid race conditions with environment variables

    // 1. Defaults
    clear_env();
    let config = Config::from_env();

    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 4848);
    assert_eq!(config.worker_threads, 8);
    assert_eq!(config.chunk_size, 16 * 1024);
    assert_eq!(config.file_ttl_hours, 24);
    assert_eq!(config.public_base_url, "http://127.0.0.1:4848/api/files");
    assert_eq!(config.assistant_provider, AssistantProvider::Gemini);
    assert!(config.assistant_endpoint.contains("generateContent"));
    assert!(config.assistant_api_key.is_none());
    assert_eq!(config.peer_transport, PeerTransportKind::Tcp);
    assert_eq!(config.cors_origins.len(), 2);
    assert_eq!(config.stall_timeout_secs, 60);
    assert_eq!(config.offer_timeout_secs, 300);

    // 2. From env
    clear_env();
    env::set_var("PORT", "9090");
    env::set_var("WORKER_THREADS", "4");
    env::set_var("CHUNK_SIZE", "1024");
    env::set_var("GEMINI_API_KEY", "legacy");
    env::set_var("PEER_TRANSPORT", "memory");
    env::set_var("CORS_ORIGINS", "https://a.example, ,https://b.example");

    let config = Config::from_env();
    assert_eq!(config.port, 9090);
    assert_eq!(config.worker_threads, 4);
    assert_eq!(config.chunk_size, 1024);
    assert_eq!(config.assistant_api_key.as_deref(), Some("legacy"));
    assert_eq!(config.peer_transport, PeerTransportKind::Memory);
    assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);

    // 3. The dedicated key wins over the legacy one, junk falls back to defaults
    env::set_var("ASSISTANT_API_KEY", "primary");
    env::set_var("ASSISTANT_PROVIDER", "relay");
    env::set_var("PORT", "not-a-port");
    env::set_var("CHUNK_SIZE", "0");

    let config = Config::from_env();
    assert_eq!(config.assistant_api_key.as_deref(), Some("primary"));
    assert_eq!(config.assistant_provider, AssistantProvider::Relay);
    assert_eq!(config.port, 4848);
    assert_eq!(config.chunk_size, 1);

    // 4. Out of range sizes and lifetimes are clamped
    env::set_var("CHUNK_SIZE", "99999999");
    env::set_var("FILE_TTL_HOURS", "-5");
    let config = Config::from_env();
    assert_eq!(config.chunk_size, MAX_CHUNK_SIZE);
    assert_eq!(config.file_ttl_hours, 1);

    env::set_var("FILE_TTL_HOURS", "9223372036854775807");
    let config = Config::from_env();
    assert_eq!(config.file_ttl_hours, MAX_FILE_TTL_HOURS);

    // 5. Bind ip falls back to loopback for host names
    let mut config = Config::from_env();
    config.host = "0.0.0.0".to_string();
    assert_eq!(config.bind_ip().to_string(), "0.0.0.0");
    config.host = "localhost".to_string();
    assert_eq!(config.bind_ip().to_string(), "127.0.0.1");

    // Cleanup
    clear_env();
}
