use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::handlers::{
    accept_offer, analyze, apply_answer, apply_desktop, batch_delete_files, chat, create_offer,
    delete_file, disconnect_peer, download_file, get_desktop, get_stats, health_check,
    list_analysis_tasks, list_files, list_peers, send_to_peer, suggest, upload_file,
};
use crate::middleware::add_security_headers;
use crate::state::AppState;
use crate::utils::shutdown_signal;

/// api routes with security headers, without the network facing layers
pub fn build_api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/analyze", post(analyze))
        .route("/api/analyze/tasks", get(list_analysis_tasks))
        .route("/api/suggest", get(suggest))
        .route("/api/files", get(list_files).post(upload_file))
        .route("/api/files/batch-delete", post(batch_delete_files))
        .route("/api/files/:id", get(download_file).delete(delete_file))
        .route("/api/stats", get(get_stats))
        .route("/api/peers", get(list_peers))
        .route("/api/peers/offer", post(create_offer))
        .route("/api/peers/accept", post(accept_offer))
        .route("/api/peers/:id", delete(disconnect_peer))
        .route("/api/peers/:id/answer", post(apply_answer))
        .route("/api/peers/:id/send", post(send_to_peer))
        .route("/api/desktop", get(get_desktop).post(apply_desktop))
        .layer(axum::middleware::from_fn(add_security_headers))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any);

    if config.cors_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// full router: rate limiting, cors, body limit, compression and tracing
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    tracing::debug!("Building router with max upload size: {} bytes", config.max_upload_size);

    // configure rate limiting
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_second.max(1))
        .burst_size(config.rate_limit_burst.max(1))
        .finish()
        .map(Arc::new);

    let router = build_api_router(state)
        .layer(RequestBodyLimitLayer::new(config.max_upload_size))
        // multipart reads are capped by the layer above, not axum's 2MB default
        .layer(axum::extract::DefaultBodyLimit::disable());

    let router = match governor_conf {
        Some(config) => router.layer(GovernorLayer { config }),
        None => {
            tracing::warn!("⚠️  Invalid rate limit settings, rate limiting disabled");
            router
        }
    };

    router
        .layer(cors_layer(config))
        .layer(CompressionLayer::new().gzip(true).br(true).zstd(true))
        .layer(TraceLayer::new_for_http())
}

/// serve until ctrl-c or sigterm
pub async fn start_server(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!("Listener bound to {}", addr);
    tracing::info!("Server running and ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .tcp_nodelay(true)
    .await
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config, peer_id: &str) {
    tracing::info!("neural-desk starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 API SERVER: http://{}:{}", config.host, config.port);
    tracing::info!("🔗 PEER ID: {} ({:?} transport)", peer_id, config.peer_transport);
    tracing::info!("🤖 ASSISTANT: {:?} at {}", config.assistant_provider, config.assistant_endpoint);
    tracing::info!(
        "📦 Chunk size {} bytes, files expire after {}h",
        config.chunk_size,
        config.file_ttl_hours
    );
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
