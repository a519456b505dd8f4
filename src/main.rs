//! guardforce - backend-for-frontend for guard onboarding and performance
//! dashboards.

use guardforce::api::GuardApiClient;
use guardforce::cache::QueryCache;
use guardforce::config::ServerConfig;
use guardforce::service::GuardService;
use guardforce::web::Server;
use guardforce::wizard::DraftStore;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle cache entries are swept.
const CACHE_GC_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("guardforce=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting guardforce on port {}...", cfg.http_port);
    tracing::info!("Guard backend at {}", cfg.api_base_url);
    tracing::info!("Using draft database at {}", cfg.db_path);

    // Initialize draft storage
    let drafts = Arc::new(DraftStore::new(&cfg.db_path)?);
    tracing::info!("Draft storage initialized successfully");

    // Backend client and query cache
    let api = GuardApiClient::new(&cfg.api_base_url, cfg.api_token.clone(), cfg.request_timeout)?;
    let cache = Arc::new(QueryCache::default());
    cache.start_gc(CACHE_GC_INTERVAL).await;

    let service = Arc::new(GuardService::new(api, Arc::clone(&cache), cfg.timezone));

    // Start web server
    let server = Server::new(cfg, service, drafts);
    let result = server.start().await;

    cache.stop_gc().await;
    result
}
