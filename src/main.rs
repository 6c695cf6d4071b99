use std::sync::Arc;

use moji_progress::cache::RedisCache;
use moji_progress::config::Config;
use moji_progress::db::DatabaseProxy;
use moji_progress::logging;
use moji_progress::workers::WorkerManager;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let db_proxy = match DatabaseProxy::from_env().await {
        Ok(proxy) => Arc::new(proxy),
        Err(err) => {
            tracing::error!(error = %err, "database proxy not initialized");
            return;
        }
    };

    let cache = match std::env::var("REDIS_URL") {
        Ok(url) => match RedisCache::connect(&url).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(err) => {
                tracing::warn!(error = %err, "redis unavailable, running without cache");
                None
            }
        },
        Err(_) => None,
    };

    let worker_manager = match WorkerManager::new(db_proxy, cache, config).await {
        Ok(manager) => {
            if let Err(e) = manager.start().await {
                tracing::error!(error = %e, "failed to start workers");
            }
            manager
        }
        Err(e) => {
            tracing::error!(error = %e, "worker manager not initialized");
            return;
        }
    };

    tracing::info!("progress batch runner started");

    shutdown_signal().await;

    tracing::info!("shutdown signal received");
    worker_manager.stop().await;
    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
