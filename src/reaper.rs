use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::error!("WAL compaction failed: {e}"),
            }
        }
    }
}

/// Background task that drops expired recurring blocks and one-off blocks
/// older than `retention_days`.
pub async fn run_retention(engine: Arc<Engine>, retention_days: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
    loop {
        interval.tick().await;
        match engine.purge_expired(retention_days).await {
            Ok(0) => {}
            Ok(n) => info!("retention sweep removed {n} expired blocks"),
            Err(e) => tracing::warn!("retention sweep failed: {e}"),
        }
    }
}
