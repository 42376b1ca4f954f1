//! Rolling throughput per data kind, used to give running jobs an ETA.

use crate::data::models::DataKind;
use crate::store::{CacheStore, PerformanceCounter, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Reads and folds completed operations into the per-kind counters.
///
/// Updates for one kind are serialized: the recurrence reads the previous
/// average and total, so concurrent finalizers would otherwise lose updates.
pub struct ThroughputEstimator {
    store: Arc<dyn CacheStore>,
    locks: [Mutex<()>; 3],
}

impl ThroughputEstimator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            locks: Default::default(),
        }
    }

    /// Seconds expected to fetch `pending` keys, `Ok(None)` while unknown.
    pub async fn estimate(&self, kind: DataKind, pending: usize) -> Result<Option<f64>, StoreError> {
        Ok(self.store.read_counter(kind).await?.estimate(pending))
    }

    /// Fold one operation of `count` requested keys taking `duration` into the counter.
    pub async fn record(
        &self,
        kind: DataKind,
        duration: Duration,
        count: usize,
    ) -> Result<PerformanceCounter, StoreError> {
        let _guard = self.locks[kind.index()].lock().await;
        let previous = self.store.read_counter(kind).await?;
        if count == 0 {
            return Ok(previous);
        }
        let next = previous.record(duration.as_secs_f64(), count as u64);
        self.store.update_counter(kind, next).await?;
        debug!(
            kind = %kind,
            average_duration_seconds = next.average_duration_seconds,
            total_completed_fetches = next.total_completed_fetches,
            "Performance counter updated"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn estimate_is_unknown_before_first_record() {
        let estimator = ThroughputEstimator::new(Arc::new(MemoryStore::new()));
        assert_eq!(estimator.estimate(DataKind::CurrentPrice, 10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_then_estimate() {
        let estimator = ThroughputEstimator::new(Arc::new(MemoryStore::new()));
        estimator
            .record(DataKind::CurrentPrice, Duration::from_secs(4), 8)
            .await
            .unwrap();
        assert_eq!(estimator.estimate(DataKind::CurrentPrice, 10).await.unwrap(), Some(5.0));
        assert_eq!(estimator.estimate(DataKind::ItemMetadata, 10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_records_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let estimator = Arc::new(ThroughputEstimator::new(store.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let estimator = estimator.clone();
                tokio::spawn(async move {
                    estimator
                        .record(DataKind::HistoricalPrice, Duration::from_secs(2), 2)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let counter = store.read_counter(DataKind::HistoricalPrice).await.unwrap();
        assert_eq!(counter.total_completed_fetches, 32);
        let avg = counter.average_duration_seconds.unwrap();
        assert!((avg - 1.0).abs() < 1e-9, "average was {avg}");
    }

    #[tokio::test]
    async fn estimate_surfaces_store_failures() {
        let store = Arc::new(MemoryStore::new());
        store.set_counters_available(false);
        let estimator = ThroughputEstimator::new(store);
        assert!(estimator.estimate(DataKind::ItemMetadata, 1).await.is_err());
    }
}
