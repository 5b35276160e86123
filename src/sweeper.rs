//! Background eviction of stale temp and output files.
//!
//! Reference outputs are never deleted per request; they live until this task
//! sees them older than the retention window. Input artifacts that escaped
//! per-request cleanup (process crash, failed delete) are evicted the same way.

use crate::storage::TempStorage;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Sweeper schedule.
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Files at least this old are deleted.
    pub retention: Duration,
}

impl SweepConfig {
    pub fn from_gateway(config: &crate::GatewayConfig) -> Self {
        Self {
            interval: config.sweep_interval(),
            retention: config.output_retention(),
        }
    }
}

/// Run sweeps until `shutdown_rx` flips to `true` (or its sender drops).
///
/// The first sweep runs immediately. Returns the total number of files evicted.
pub async fn sweep_task(
    storage: TempStorage,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> usize {
    let mut ticker = interval(config.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        retention_secs = config.retention.as_secs(),
        "Sweeper started"
    );

    let mut total = 0usize;
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let removed = storage.sweep(config.retention).await;
                if removed > 0 {
                    tracing::info!(removed, "Swept stale files");
                }
                total += removed;
            }
        }
    }

    tracing::info!(total_removed = total, "Sweeper stopped");
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn first_tick_sweeps_and_shutdown_stops() {
        let dir = TempDir::new().unwrap();
        let storage = TempStorage::init(dir.path(), 1024).await.unwrap();
        storage.store(b"old", "a.pdf").await.unwrap();
        storage.store_output("# x", "a.pdf").await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_task(
            storage.clone(),
            SweepConfig {
                interval: Duration::from_secs(3600),
                retention: Duration::ZERO,
            },
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        let removed = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed, 2);

        let usage = storage.usage().await.unwrap();
        assert_eq!(usage.temp_file_count, 0);
        assert_eq!(usage.output_file_count, 0);
    }

    #[tokio::test]
    async fn fresh_files_survive() {
        let dir = TempDir::new().unwrap();
        let storage = TempStorage::init(dir.path(), 1024).await.unwrap();
        storage.store_output("# keep", "b.pdf").await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_task(
            storage.clone(),
            SweepConfig {
                interval: Duration::from_secs(3600),
                retention: Duration::from_secs(3600),
            },
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        assert_eq!(handle.await.unwrap(), 0);
        assert_eq!(storage.usage().await.unwrap().output_file_count, 1);
    }
}
