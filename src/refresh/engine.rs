//! The incremental refresh algorithm.
//!
//! A job classifies its keys against the cache, fetches only the missing or
//! stale ones in ordered batches, merges each batch into the store, and folds
//! the run into the per-kind throughput counter. Every step is published as a
//! fresh [`JobSnapshot`] so pollers always see a consistent view.
//!
//! Failures are contained: a failed upstream batch only drops its keys from
//! this job's result, and a failed store call ends the job early as complete
//! with whatever was merged so far.

use super::batch::{MAX_BATCH_SIZE, batches, dedup_keys};
use super::estimator::ThroughputEstimator;
use super::job::{JobId, JobItems, JobSnapshot, JobState, SnapshotSlot};
use super::staleness::StalenessPolicy;
use crate::data::models::{DataKind, ItemId, Payload};
use crate::store::{CacheEntry, CacheStore, StoreError};
use crate::upstream::Gateways;
use crate::utils::{fmt_duration, log_if_slow};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const SLOW_JOB_THRESHOLD: Duration = Duration::from_secs(60);

/// What a caller asked to refresh. Keys are de-duplicated in first-seen order
/// and the scope is dropped for kinds that are not partitioned by world.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRequest {
    pub kind: DataKind,
    pub keys: Vec<ItemId>,
    pub scope: Option<String>,
}

impl RefreshRequest {
    pub fn new(kind: DataKind, keys: impl IntoIterator<Item = ItemId>, scope: Option<String>) -> Self {
        Self {
            kind,
            keys: dedup_keys(keys),
            scope: scope.filter(|_| kind.is_scoped()),
        }
    }
}

/// Summary of a finished job, used for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub requested: usize,
    pub satisfied: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed_batches: usize,
    /// The store failed and the job ended before processing every batch.
    pub aborted: bool,
}

impl JobOutcome {
    pub fn resolved(&self) -> usize {
        self.satisfied + self.inserted + self.updated
    }
}

/// Mutable state of one running job; every change is published wholesale.
struct Progress<'a> {
    id: JobId,
    request: &'a RefreshRequest,
    slot: &'a SnapshotSlot,
    started: Instant,
    estimate: Option<f64>,
    items: Arc<JobItems>,
}

impl Progress<'_> {
    fn publish(&self, state: JobState) {
        let complete = state == JobState::Complete;
        self.slot.publish(JobSnapshot {
            id: self.id,
            kind: self.request.kind,
            scope: self.request.scope.clone(),
            state,
            requested: self.request.keys.len(),
            items: self.items.clone(),
            estimated_total_seconds: self.estimate,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            completed_at: complete.then(Utc::now),
        });
    }

    fn insert(&mut self, entries: Vec<CacheEntry>) {
        let items = Arc::make_mut(&mut self.items);
        for entry in entries {
            items.insert(entry.key, entry.payload);
        }
    }
}

/// Keys split by what the cache already holds.
#[derive(Debug, Default)]
struct Classified {
    satisfied: Vec<CacheEntry>,
    pending: Vec<ItemId>,
    /// Pending keys that already have a (stale) row.
    stale: HashSet<ItemId>,
}

pub struct RefreshEngine {
    store: Arc<dyn CacheStore>,
    gateways: Gateways,
    policy: StalenessPolicy,
    estimator: ThroughputEstimator,
}

impl RefreshEngine {
    pub fn new(store: Arc<dyn CacheStore>, gateways: Gateways, policy: StalenessPolicy) -> Self {
        Self {
            estimator: ThroughputEstimator::new(store.clone()),
            store,
            gateways,
            policy,
        }
    }

    /// Run one job to completion, publishing every step into `slot`.
    ///
    /// Always ends by publishing a complete snapshot.
    pub async fn run(&self, id: JobId, request: RefreshRequest, slot: &SnapshotSlot) -> JobOutcome {
        let mut progress = Progress {
            id,
            request: &request,
            slot,
            started: Instant::now(),
            estimate: None,
            items: Arc::new(JobItems::new()),
        };
        let mut outcome = JobOutcome {
            requested: request.keys.len(),
            ..Default::default()
        };

        if request.keys.is_empty() {
            progress.estimate = Some(0.0);
            progress.publish(JobState::Complete);
            debug!("Empty refresh request completed immediately");
            return outcome;
        }

        let classified = match self.classify(&request).await {
            Ok(classified) => classified,
            Err(e) => {
                error!(error = %e, "Cache read failed, completing job without items");
                outcome.aborted = true;
                progress.publish(JobState::Complete);
                return outcome;
            }
        };
        outcome.satisfied = classified.satisfied.len();
        progress.insert(classified.satisfied);
        progress.estimate = match self
            .estimator
            .estimate(request.kind, classified.pending.len())
            .await
        {
            Ok(estimate) => estimate,
            Err(e) => {
                error!(error = %e, "Counter read failed, completing job with cached items");
                outcome.aborted = true;
                progress.publish(JobState::Complete);
                return outcome;
            }
        };

        debug!(
            requested = outcome.requested,
            satisfied = outcome.satisfied,
            pending = classified.pending.len(),
            stale = classified.stale.len(),
            estimated_total_seconds = progress.estimate,
            "Classified requested keys"
        );
        progress.publish(JobState::Running);

        let gateway = self.gateways.get(request.kind);
        let scope = request.scope.as_deref();
        let total_batches = classified.pending.len().div_ceil(MAX_BATCH_SIZE);

        for (index, batch) in batches(&classified.pending).enumerate() {
            progress.publish(JobState::Running);

            let mut fetched = match gateway.fetch_batch(scope, batch).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(
                        batch = index + 1,
                        total_batches,
                        keys = batch.len(),
                        error = %e,
                        "Upstream batch failed, dropping its keys from this job"
                    );
                    outcome.failed_batches += 1;
                    continue;
                }
            };

            let entries = self.merge_entries(&request, batch, &mut fetched);
            if let Err(e) = self.store.upsert(&entries).await {
                error!(
                    batch = index + 1,
                    total_batches,
                    error = %e,
                    "Cache write failed, ending job early"
                );
                outcome.aborted = true;
                break;
            }

            let updated = entries
                .iter()
                .filter(|entry| classified.stale.contains(&entry.key))
                .count();
            outcome.updated += updated;
            outcome.inserted += entries.len() - updated;
            debug!(
                batch = index + 1,
                total_batches,
                requested = batch.len(),
                merged = entries.len(),
                "Merged batch"
            );
            progress.insert(entries);
        }

        self.finalize(&request, &mut progress, &outcome).await;
        outcome
    }

    async fn classify(&self, request: &RefreshRequest) -> Result<Classified, StoreError> {
        let existing = self
            .store
            .read(request.kind, &request.keys, request.scope.as_deref())
            .await?;
        let mut existing: HashMap<ItemId, CacheEntry> = existing
            .into_iter()
            .filter(|entry| entry.kind() == request.kind)
            .map(|entry| (entry.key, entry))
            .collect();

        let now = Utc::now();
        let mut classified = Classified::default();
        for &key in &request.keys {
            match existing.remove(&key) {
                Some(entry)
                    if !self
                        .policy
                        .is_stale(Some(entry.last_refreshed_at), request.kind, now) =>
                {
                    classified.satisfied.push(entry);
                }
                Some(_) => {
                    classified.stale.insert(key);
                    classified.pending.push(key);
                }
                None => classified.pending.push(key),
            }
        }
        Ok(classified)
    }

    /// Turn a batch result into store entries, keeping only keys the batch
    /// asked for with a payload of the right kind, in batch order.
    fn merge_entries(
        &self,
        request: &RefreshRequest,
        batch: &[ItemId],
        fetched: &mut HashMap<ItemId, Payload>,
    ) -> Vec<CacheEntry> {
        let now = Utc::now();
        let entries: Vec<CacheEntry> = batch
            .iter()
            .filter_map(|&key| {
                let payload = fetched.remove(&key)?;
                if payload.kind() != request.kind {
                    warn!(key, found = %payload.kind(), "Upstream returned a payload of the wrong kind");
                    return None;
                }
                Some(CacheEntry {
                    key,
                    scope: request.scope.clone(),
                    payload,
                    last_refreshed_at: now,
                })
            })
            .collect();
        if !fetched.is_empty() {
            debug!(extra = fetched.len(), "Ignoring unrequested keys in upstream response");
        }
        entries
    }

    async fn finalize(&self, request: &RefreshRequest, progress: &mut Progress<'_>, outcome: &JobOutcome) {
        let duration = progress.started.elapsed();

        // Counter writes go through the same store that just failed.
        if !outcome.aborted {
            if let Err(e) = self
                .estimator
                .record(request.kind, duration, request.keys.len())
                .await
            {
                warn!(error = %e, "Failed to update performance counter");
            }
        }

        progress.publish(JobState::Complete);
        log_if_slow(progress.started.into_std(), SLOW_JOB_THRESHOLD, "refresh job");
        info!(
            requested = outcome.requested,
            resolved = outcome.resolved(),
            satisfied = outcome.satisfied,
            inserted = outcome.inserted,
            updated = outcome.updated,
            failed_batches = outcome.failed_batches,
            aborted = outcome.aborted,
            duration = fmt_duration(duration),
            "Refresh job complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{CurrentPrice, ItemMetadata};
    use crate::store::MemoryStore;
    use crate::upstream::{UpstreamError, UpstreamGateway};
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::sync::Mutex;

    /// Resolves every key to a payload of its kind and records batches.
    struct EchoGateway {
        kind: DataKind,
        calls: Mutex<Vec<Vec<ItemId>>>,
    }

    impl EchoGateway {
        fn new(kind: DataKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn payload(&self, key: ItemId) -> Payload {
            match self.kind {
                DataKind::ItemMetadata => Payload::Item(ItemMetadata {
                    name: format!("item {key}"),
                    icon_path: String::new(),
                }),
                _ => Payload::Current(CurrentPrice {
                    current_min_price_nq: Some(i64::from(key)),
                }),
            }
        }
    }

    #[async_trait]
    impl UpstreamGateway for EchoGateway {
        fn kind(&self) -> DataKind {
            self.kind
        }

        async fn fetch_batch(
            &self,
            _scope: Option<&str>,
            keys: &[ItemId],
        ) -> Result<HashMap<ItemId, Payload>, UpstreamError> {
            self.calls.lock().unwrap().push(keys.to_vec());
            Ok(keys.iter().map(|&k| (k, self.payload(k))).collect())
        }
    }

    fn engine(store: Arc<MemoryStore>, metadata: Arc<EchoGateway>) -> RefreshEngine {
        let gateways = Gateways::new(
            metadata,
            EchoGateway::new(DataKind::CurrentPrice),
            EchoGateway::new(DataKind::HistoricalPrice),
        );
        RefreshEngine::new(store, gateways, StalenessPolicy::default())
    }

    fn slot(kind: DataKind) -> SnapshotSlot {
        SnapshotSlot::new(JobSnapshot::pending(JobId::new(), kind, None, 0))
    }

    #[test]
    fn request_dedups_keys_and_drops_metadata_scope() {
        let request = RefreshRequest::new(DataKind::ItemMetadata, [4, 4, 2], Some("Gaia".into()));
        assert_eq!(request.keys, vec![4, 2]);
        assert_eq!(request.scope, None);

        let request = RefreshRequest::new(DataKind::CurrentPrice, [1], Some("Gaia".into()));
        assert_eq!(request.scope.as_deref(), Some("Gaia"));
    }

    #[tokio::test]
    async fn stale_rows_are_updated_and_missing_rows_inserted() {
        let store = Arc::new(MemoryStore::new());
        let stale_at = Utc::now() - TimeDelta::days(31);
        store.seed(CacheEntry {
            key: 1,
            scope: None,
            payload: Payload::Item(ItemMetadata {
                name: "old".to_owned(),
                icon_path: String::new(),
            }),
            last_refreshed_at: stale_at,
        });
        let gateway = EchoGateway::new(DataKind::ItemMetadata);
        let engine = engine(store.clone(), gateway.clone());
        let slot = slot(DataKind::ItemMetadata);

        let outcome = engine
            .run(
                JobId::new(),
                RefreshRequest::new(DataKind::ItemMetadata, [1, 2], None),
                &slot,
            )
            .await;

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(*gateway.calls.lock().unwrap(), vec![vec![1, 2]]);
        let refreshed = store.get(DataKind::ItemMetadata, 1, None).unwrap();
        assert!(refreshed.last_refreshed_at > stale_at);
        assert_eq!(slot.latest().items.len(), 2);
    }

    #[tokio::test]
    async fn fully_cached_request_makes_no_upstream_call_but_counts() {
        let store = Arc::new(MemoryStore::new());
        store.seed(CacheEntry {
            key: 7,
            scope: None,
            payload: Payload::Item(ItemMetadata {
                name: "Ether".to_owned(),
                icon_path: String::new(),
            }),
            last_refreshed_at: Utc::now(),
        });
        let gateway = EchoGateway::new(DataKind::ItemMetadata);
        let engine = engine(store.clone(), gateway.clone());
        let slot = slot(DataKind::ItemMetadata);

        let outcome = engine
            .run(
                JobId::new(),
                RefreshRequest::new(DataKind::ItemMetadata, [7], None),
                &slot,
            )
            .await;

        assert_eq!(outcome.satisfied, 1);
        assert!(gateway.calls.lock().unwrap().is_empty());
        let counter = store.read_counter(DataKind::ItemMetadata).await.unwrap();
        assert_eq!(counter.total_completed_fetches, 1);
    }

    #[tokio::test]
    async fn counter_read_failure_ends_job_with_cached_items() {
        let store = Arc::new(MemoryStore::new());
        store.seed(CacheEntry {
            key: 7,
            scope: None,
            payload: Payload::Item(ItemMetadata {
                name: "Ether".to_owned(),
                icon_path: String::new(),
            }),
            last_refreshed_at: Utc::now(),
        });
        store.set_counters_available(false);
        let gateway = EchoGateway::new(DataKind::ItemMetadata);
        let engine = engine(store.clone(), gateway.clone());
        let slot = slot(DataKind::ItemMetadata);

        let outcome = engine
            .run(
                JobId::new(),
                RefreshRequest::new(DataKind::ItemMetadata, [7, 8], None),
                &slot,
            )
            .await;

        assert!(outcome.aborted);
        assert!(gateway.calls.lock().unwrap().is_empty());
        assert_eq!(store.count(DataKind::ItemMetadata), 1);
        let snapshot = slot.latest();
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.items.keys().copied().collect::<Vec<_>>(), vec![7]);
    }
}
