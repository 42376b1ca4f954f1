//! Process-wide job map: allocates ids, supervises job tasks, and serves
//! snapshots to pollers.

use super::engine::{RefreshEngine, RefreshRequest};
use super::job::{JobId, JobSnapshot, JobState, JobStatus, SnapshotSlot};
use super::staleness::is_expired;
use crate::data::models::{DataKind, ItemId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};
use ts_rs::TS;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("a world is required for {0} jobs")]
    ScopeRequired(DataKind),
    #[error("job registry is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct JobCounts {
    pub running: usize,
    pub complete: usize,
}

struct Inner {
    engine: Arc<RefreshEngine>,
    jobs: DashMap<JobId, SnapshotSlot>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    retention: Duration,
}

/// Explicit job registry owned by the application state. Clone-cheap.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl JobRegistry {
    /// `max_concurrent_jobs` bounds how many jobs run their fetch loop at
    /// once; the rest wait as running with no progress.
    pub fn new(engine: Arc<RefreshEngine>, max_concurrent_jobs: usize, retention: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                jobs: DashMap::new(),
                permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
                tracker: TaskTracker::new(),
                retention,
            }),
        }
    }

    /// Register a job and start it in the background. Never waits on the job.
    pub fn create_job(
        &self,
        kind: DataKind,
        keys: impl IntoIterator<Item = ItemId>,
        scope: Option<String>,
    ) -> Result<JobId, RegistryError> {
        if self.inner.tracker.is_closed() {
            return Err(RegistryError::ShuttingDown);
        }
        let scope = scope
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty());
        if kind.is_scoped() && scope.is_none() {
            return Err(RegistryError::ScopeRequired(kind));
        }

        let request = RefreshRequest::new(kind, keys, scope);
        let id = JobId::new();
        let mut snapshot = JobSnapshot::pending(id, kind, request.scope.clone(), request.keys.len());

        // Nothing to fetch: never queue behind the concurrency limit.
        if request.keys.is_empty() {
            snapshot.state = JobState::Complete;
            snapshot.estimated_total_seconds = Some(0.0);
            snapshot.completed_at = Some(Utc::now());
            self.inner.jobs.insert(id, SnapshotSlot::new(snapshot));
            debug!(job_id = %id, kind = %kind, "Empty job completed on creation");
            return Ok(id);
        }

        let slot = SnapshotSlot::new(snapshot);
        self.inner.jobs.insert(id, slot.clone());

        let span = info_span!(
            "refresh_job",
            job_id = %id,
            kind = %kind,
            scope = request.scope.as_deref(),
            keys = request.keys.len()
        );
        let engine = self.inner.engine.clone();
        let permits = self.inner.permits.clone();
        self.inner.tracker.spawn(
            async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                engine.run(id, request, &slot).await;
            }
            .instrument(span),
        );
        debug!(job_id = %id, kind = %kind, "Job created");
        Ok(id)
    }

    pub fn get_status(&self, id: JobId) -> Result<JobStatus, RegistryError> {
        self.inner
            .jobs
            .get(&id)
            .map(|slot| slot.latest().status())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Latest snapshot including items. A complete job is removed by this
    /// call, so exactly one caller receives its final result.
    pub fn get_result(&self, id: JobId) -> Result<Arc<JobSnapshot>, RegistryError> {
        match self.inner.jobs.entry(id) {
            Entry::Occupied(entry) => {
                let snapshot = entry.get().latest();
                if snapshot.is_complete() {
                    entry.remove();
                    debug!(job_id = %id, items = snapshot.items.len(), "Job result consumed");
                }
                Ok(snapshot)
            }
            Entry::Vacant(_) => Err(RegistryError::NotFound(id)),
        }
    }

    /// Wait until the job publishes its complete snapshot, without consuming it.
    pub async fn wait_for_completion(&self, id: JobId) -> Result<Arc<JobSnapshot>, RegistryError> {
        let mut rx = self
            .inner
            .jobs
            .get(&id)
            .map(|slot| slot.subscribe())
            .ok_or(RegistryError::NotFound(id))?;
        let snapshot = rx
            .wait_for(|snapshot| snapshot.is_complete())
            .await
            .map_err(|_| RegistryError::NotFound(id))?;
        Ok(snapshot.clone())
    }

    /// Drop complete jobs whose result went unclaimed for longer than the
    /// retention window. Running jobs are never evicted.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.inner.jobs.len();
        let retention = self.inner.retention;
        self.inner.jobs.retain(|_, slot| {
            let snapshot = slot.latest();
            !(snapshot.is_complete() && is_expired(snapshot.completed_at, retention, now))
        });
        let evicted = before.saturating_sub(self.inner.jobs.len());
        if evicted > 0 {
            info!(evicted, "Evicted unclaimed job results");
        }
        evicted
    }

    pub fn counts(&self) -> JobCounts {
        self.inner
            .jobs
            .iter()
            .fold(JobCounts::default(), |mut counts, slot| {
                if slot.latest().is_complete() {
                    counts.complete += 1;
                } else {
                    counts.running += 1;
                }
                counts
            })
    }

    /// Stop accepting jobs and wait up to `timeout` for running ones.
    /// Returns `false` if jobs were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.tracker.close();
        let running = self.inner.tracker.len();
        if running == 0 {
            return true;
        }
        info!(running, "Waiting for running jobs to finish");
        match tokio::time::timeout(timeout, self.inner.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    still_running = self.inner.tracker.len(),
                    "Jobs did not finish before the shutdown timeout"
                );
                false
            }
        }
    }
}
