use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::cache::RedisCache;
use crate::db::DatabaseProxy;
use crate::response::EngineError;
use crate::services::leaderboard;

/// Recomputes and persists every period's ranked snapshot.
pub async fn run_refresh(
    db: Arc<DatabaseProxy>,
    cache: Option<Arc<RedisCache>>,
) -> Result<(), EngineError> {
    let report = leaderboard::update_all_leaderboards(&db, cache.as_deref(), Utc::now()).await;

    if !report.failures.is_empty() {
        warn!(
            failed = report.failures.len(),
            "leaderboard refresh completed with failures"
        );
    }

    Ok(())
}
