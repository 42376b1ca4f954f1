//! Job identity, snapshots, and the atomically replaceable snapshot slot.

use crate::data::models::{DataKind, ItemId, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use ts_rs::TS;
use ulid::Ulid;

/// Opaque 128-bit job identifier, rendered as a ULID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Ulid);

impl JobId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(JobId)
    }
}

impl Serialize for JobId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum JobState {
    Running,
    Complete,
}

pub type JobItems = BTreeMap<ItemId, Payload>;

/// One published view of a job. Never mutated after publication.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: DataKind,
    pub scope: Option<String>,
    pub state: JobState,
    /// Number of distinct keys requested.
    pub requested: usize,
    pub items: Arc<JobItems>,
    /// `None` while no completed operation of this kind has been recorded.
    pub estimated_total_seconds: Option<f64>,
    pub elapsed_seconds: f64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// Snapshot of a job that has been accepted but not yet classified.
    pub fn pending(id: JobId, kind: DataKind, scope: Option<String>, requested: usize) -> Self {
        Self {
            id,
            kind,
            scope,
            state: JobState::Running,
            requested,
            items: Arc::new(JobItems::new()),
            estimated_total_seconds: None,
            elapsed_seconds: 0.0,
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == JobState::Complete
    }

    /// The snapshot without its items.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id.to_string(),
            kind: self.kind,
            scope: self.scope.clone(),
            state: self.state,
            requested: self.requested,
            resolved: self.items.len(),
            estimated_total_seconds: self.estimated_total_seconds,
            elapsed_seconds: self.elapsed_seconds,
            completed_at: self.completed_at,
        }
    }
}

/// Progress view served to pollers.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct JobStatus {
    pub id: String,
    pub kind: DataKind,
    pub scope: Option<String>,
    pub state: JobState,
    pub requested: usize,
    pub resolved: usize,
    pub estimated_total_seconds: Option<f64>,
    pub elapsed_seconds: f64,
    #[ts(type = "string | null")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Latest snapshot of one job. Publishing replaces the whole snapshot, so
/// readers never observe a half-written state and never wait on the writer.
#[derive(Debug, Clone)]
pub struct SnapshotSlot {
    tx: Arc<watch::Sender<Arc<JobSnapshot>>>,
}

impl SnapshotSlot {
    pub fn new(initial: JobSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, snapshot: JobSnapshot) {
        self.tx.send_replace(Arc::new(snapshot));
    }

    pub fn latest(&self) -> Arc<JobSnapshot> {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every publish, for callers that want to wait
    /// rather than poll.
    pub fn subscribe(&self) -> watch::Receiver<Arc<JobSnapshot>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::ItemMetadata;

    #[test]
    fn job_ids_round_trip_and_differ() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<JobId>().unwrap(), a);
        assert!("not-a-ulid".parse::<JobId>().is_err());
    }

    #[test]
    fn status_strips_items_but_counts_them() {
        let mut snapshot = JobSnapshot::pending(JobId::new(), DataKind::ItemMetadata, None, 2);
        let mut items = JobItems::new();
        items.insert(
            1,
            Payload::Item(ItemMetadata {
                name: "Potion".to_owned(),
                icon_path: String::new(),
            }),
        );
        snapshot.items = Arc::new(items);

        let status = serde_json::to_value(snapshot.status()).unwrap();
        assert_eq!(status["resolved"], 1);
        assert_eq!(status["requested"], 2);
        assert_eq!(status["state"], "running");
        assert_eq!(status["kind"], "item-metadata");
        assert!(status["estimatedTotalSeconds"].is_null());
        assert!(status.get("items").is_none());
    }

    #[test]
    fn slot_readers_see_latest_publish() {
        let id = JobId::new();
        let slot = SnapshotSlot::new(JobSnapshot::pending(id, DataKind::CurrentPrice, None, 0));
        let held = slot.latest();

        let mut done = JobSnapshot::pending(id, DataKind::CurrentPrice, None, 0);
        done.state = JobState::Complete;
        slot.publish(done);

        assert!(!held.is_complete());
        assert!(slot.latest().is_complete());
    }
}
