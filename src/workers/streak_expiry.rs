use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::db::DatabaseProxy;
use crate::response::EngineError;
use crate::services::streak;

/// Daily authoritative streak expiry, independent of user activity.
pub async fn run_expiry_sweep(db: Arc<DatabaseProxy>) -> Result<(), EngineError> {
    let report = streak::expire_streaks(&db, Utc::now()).await?;

    if !report.failures.is_empty() {
        warn!(
            failed = report.failures.len(),
            "streak expiry sweep completed with failures"
        );
    }

    Ok(())
}
