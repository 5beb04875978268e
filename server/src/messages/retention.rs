//! Background purge of old chat messages.
//!
//! Off unless `retention.enabled` is set. The window and the cadence both come
//! from config.

use std::time::Duration;

use crate::config::RetentionConfig;
use crate::db::{self, DbPool};
use crate::messages::store;

/// Delete messages older than `max_age` once. Returns the number removed.
pub async fn purge_once(db: &DbPool, max_age: Duration) -> Result<usize, db::StoreError> {
    let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    let cutoff = chrono::Utc::now()
        .checked_sub_signed(max_age)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
    db::with_conn(db, move |conn| store::delete_older_than(conn, cutoff)).await
}

/// Spawn the periodic purge if enabled. Returns whether a task was started.
pub fn spawn_retention_cleanup(db: DbPool, config: &RetentionConfig) -> bool {
    if !config.enabled {
        tracing::debug!("Message retention purge disabled");
        return false;
    }

    let interval = Duration::from_secs(config.interval_secs.max(1));
    let max_age = Duration::from_secs(config.max_age_secs);
    tracing::info!(
        max_age_secs = config.max_age_secs,
        interval_secs = interval.as_secs(),
        "Message retention purge enabled"
    );

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match purge_once(&db, max_age).await {
                Ok(count) if count > 0 => {
                    tracing::info!("Message retention cleanup: purged {} messages", count);
                }
                Ok(_) => {
                    tracing::debug!("Message retention cleanup: nothing to purge");
                }
                Err(e) => {
                    tracing::error!("Message retention cleanup error: {}", e);
                }
            }
        }
    });

    true
}
