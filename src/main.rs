use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use neural_desk::config::Config;
use neural_desk::server::{build_router, print_startup_banner, start_server};
use neural_desk::state::AppState;

// use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// how often expired files and stalled transfers are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    // load configuration from environment variables
    let config = Config::from_env();

    // build tokio runtime with configured worker threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        let state = Arc::new(AppState::from_config(&config).expect("Failed to build assistant client"));

        // background sweep: expired files, stalled transfers and unanswered offers
        let sweeper = {
            let state = state.clone();
            let stall_timeout = Duration::from_secs(config.stall_timeout_secs);
            let offer_timeout = Duration::from_secs(config.offer_timeout_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    interval.tick().await;
                    let purged = state.files.purge_expired(chrono::Utc::now());
                    let stalled = state.node.sweep_stalled(stall_timeout);
                    let offers = state.node.expire_offers(offer_timeout).await;
                    if purged + stalled + offers > 0 {
                        tracing::info!(
                            "🧹 Swept {} expired files, {} stalled transfers, {} unanswered offers",
                            purged,
                            stalled,
                            offers
                        );
                    }
                }
            })
        };

        let addr = SocketAddr::new(config.bind_ip(), config.port);
        print_startup_banner(&config, state.node.local_id());

        let app = build_router(state.clone(), &config);
        if let Err(e) = start_server(app, addr).await {
            tracing::error!("Server error: {}", e);
        }

        sweeper.abort();
        state.node.shutdown().await;
        tracing::info!("🛑 Shut down");
    });
}
