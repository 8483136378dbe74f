use std::sync::Arc;

use reelfeed_api::config::Config;
use reelfeed_api::db::{self, Cache, CacheWriterHandle, MongoClient};
use reelfeed_api::routes::{self, AppState};
use reelfeed_api::services::{
    AnalyticsHandle, AnalyticsWorkerHandle, FeedOptions, FeedService, LogSink, PrefetchConfig,
    PrefetchPlanner, ProgressService,
};
use reelfeed_api::store::{CatalogStore, MemoryStore, MongoStore, UserStore, WatchStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelfeed_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Cache: Redis in production, in-process fallback for local development
    let (cache, cache_writer) = if config.use_memory_backends {
        tracing::info!("Using in-process memory cache");
        Cache::in_memory()
    } else {
        let redis_client = db::create_redis_client(&config.redis_url)?;
        tracing::info!("Connected to Redis with async cache writer");
        Cache::with_redis(redis_client)
    };

    // Document store
    let (catalog, users, watch): (
        Arc<dyn CatalogStore>,
        Arc<dyn UserStore>,
        Arc<dyn WatchStore>,
    ) = if config.use_memory_backends {
        tracing::info!("Using in-process memory store");
        let store = Arc::new(MemoryStore::new());
        (store.clone(), store.clone(), store)
    } else {
        let client = MongoClient::connect(&config.mongodb_uri, &config.mongodb_db).await?;
        let store = Arc::new(MongoStore::new(&client).await?);
        (store.clone(), store.clone(), store)
    };

    // Analytics dispatcher, drained to structured logs
    let (analytics, analytics_worker) = AnalyticsHandle::spawn(Arc::new(LogSink));

    let prefetch = PrefetchPlanner::new(
        catalog.clone(),
        watch.clone(),
        cache.clone(),
        PrefetchConfig {
            cards: config.prefetch_cards,
            episodes_per_card: config.prefetch_episodes_per_card,
            quality: config.prefetch_quality.clone(),
        },
    );

    let feed = Arc::new(FeedService::new(
        catalog.clone(),
        users.clone(),
        watch.clone(),
        cache.clone(),
        prefetch,
        analytics.clone(),
        FeedOptions::from(&config),
    ));

    let progress = Arc::new(ProgressService::new(
        catalog,
        watch,
        cache,
        analytics,
        config.completion_threshold,
        config.continue_watching_min,
        config.continue_watching_max,
    ));

    // Create application router
    let app = routes::create_router(AppState { feed, progress });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cache_writer, analytics_worker))
        .await?;

    Ok(())
}

/// Waits for shutdown (Ctrl+C or SIGTERM), then flushes background workers
async fn shutdown_signal(cache_writer: CacheWriterHandle, analytics_worker: AnalyticsWorkerHandle) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully");
        },
    }

    // Flush pending cache writes and analytics events
    cache_writer.shutdown().await;
    analytics_worker.shutdown().await;
}
