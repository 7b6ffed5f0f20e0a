// Background maintenance: rotating statistics snapshots and dedup sweeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::InteractionDedup;
use crate::stats::StatsStore;

/// Spawn the maintenance worker.
///
/// Every `backup_interval` it writes a rotating snapshot of the statistics;
/// every `sweep_interval` it drops expired dedup records. It stops when
/// `shutdown` flips to true.
pub fn spawn_maintenance(
    stats: Arc<StatsStore>,
    dedup: InteractionDedup,
    backup_interval: Duration,
    sweep_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backup_tick = tokio::time::interval(backup_interval);
        let mut sweep_tick = tokio::time::interval(sweep_interval);
        // The first tick of an interval completes immediately.
        backup_tick.tick().await;
        sweep_tick.tick().await;

        loop {
            tokio::select! {
                _ = backup_tick.tick() => take_snapshot(&stats).await,
                _ = sweep_tick.tick() => {
                    let remaining = dedup.sweep();
                    tracing::debug!("Dedup sweep done, {remaining} records retained");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Maintenance worker stopping");
                        return;
                    }
                }
            }
        }
    })
}

async fn take_snapshot(stats: &Arc<StatsStore>) {
    let stats = stats.clone();
    match tokio::task::spawn_blocking(move || stats.snapshot()).await {
        Ok(Ok(path)) => tracing::debug!("Scheduled snapshot done: {}", path.display()),
        Ok(Err(e)) => tracing::error!("Scheduled statistics snapshot failed: {e}"),
        Err(e) => tracing::error!("Snapshot task did not finish: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::UserId;
    use crate::stats::{StatsMap, StatsPaths};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_periodic_snapshot_and_sweep() {
        let dir = std::env::temp_dir().join(format!("duel-bot-maint-{}", Uuid::new_v4()));
        let stats = Arc::new(StatsStore::with_map(StatsPaths::in_dir(&dir), StatsMap::new()));
        stats.record_result(UserId(1), UserId(2)).unwrap();

        let dedup = InteractionDedup::new(Duration::from_millis(10));
        assert!(dedup.first_delivery("1_win_1_2"));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_maintenance(
            stats.clone(),
            dedup.clone(),
            Duration::from_millis(40),
            Duration::from_millis(20),
            rx,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(dedup.is_empty());
        let snapshots = std::fs::read_dir(&stats.paths().snapshot_dir)
            .unwrap()
            .count();
        assert!(snapshots >= 1);

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop on shutdown")
            .unwrap();
    }
}
