use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::Clock;
use crate::model::Ms;
use crate::orchestrator::Orchestrator;
use crate::store::Store;

/// Background task that periodically cancels lapsed holds.
///
/// Expiry is already enforced lazily on every read; sweeping only keeps the
/// stored status in step with what readers see.
pub async fn run_sweeper(orchestrator: Arc<Orchestrator>, every: Duration) {
    if every.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let swept = orchestrator.sweep_expired().await;
        if swept > 0 {
            info!(swept, "swept lapsed holds");
        }
    }
}

/// Background task that compacts the WAL once `threshold` appends have
/// accumulated since the last compaction. Compaction also prunes old history.
pub async fn run_compactor(store: Arc<Store>, clock: Arc<dyn Clock>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold, clock.now_ms()).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

async fn compact_if_due(store: &Store, threshold: u64, now: Ms) -> Result<bool, crate::error::BookingError> {
    let appends = store.wal_appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return Ok(false);
    }
    info!(appends, "compacting WAL");
    store.compact(now).await?;
    Ok(true)
}
