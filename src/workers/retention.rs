use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use crate::db::operations::{analytics, progress};
use crate::db::DatabaseProxy;
use crate::response::EngineError;

/// Bulk retention cleanup: old ledger entries and daily analytics rows past
/// the configured horizon. Recomputes nothing, so reruns are harmless.
pub async fn run_retention_cleanup(
    db: Arc<DatabaseProxy>,
    retention_days: i64,
) -> Result<(), EngineError> {
    let cutoff = Utc::now() - Duration::days(retention_days);

    let transactions_removed =
        progress::delete_xp_transactions_before(db.pool(), cutoff).await?;
    let analytics_removed =
        analytics::delete_analytics_before(db.pool(), cutoff.date_naive()).await?;

    info!(
        retention_days,
        transactions_removed, analytics_removed, "retention cleanup finished"
    );

    Ok(())
}
