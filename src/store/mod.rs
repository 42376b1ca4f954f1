//! Cache store abstraction: cached entries per data kind plus the rolling
//! performance counters used for ETA estimation.

pub mod memory;
pub mod postgres;

use crate::data::models::{DataKind, ItemId, Payload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// One cached record, identified by `(key, scope)` within its payload's kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: ItemId,
    /// World for price data, `None` for item metadata.
    pub scope: Option<String>,
    pub payload: Payload,
    pub last_refreshed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn kind(&self) -> DataKind {
        self.payload.kind()
    }
}

/// Rolling fetch throughput for one data kind.
///
/// The average is per requested key and stays unknown until the first
/// completed operation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceCounter {
    pub average_duration_seconds: Option<f64>,
    pub total_completed_fetches: u64,
}

impl PerformanceCounter {
    /// Fold one completed operation into the counter.
    ///
    /// `new_avg = (old_avg * old_total + duration) / (old_total + count)`
    pub fn record(self, duration_seconds: f64, count: u64) -> Self {
        let total = self.total_completed_fetches.saturating_add(count);
        if total == 0 {
            return self;
        }
        let previous = match self.average_duration_seconds {
            Some(avg) => avg * self.total_completed_fetches as f64,
            None => 0.0,
        };
        Self {
            average_duration_seconds: Some((previous + duration_seconds) / total as f64),
            total_completed_fetches: total,
        }
    }

    /// Estimated seconds to fetch `pending` keys, or `None` while unknown.
    pub fn estimate(&self, pending: usize) -> Option<f64> {
        match self.average_duration_seconds {
            Some(avg) if self.total_completed_fetches > 0 => Some(avg * pending as f64),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache store query failed")]
    Database(#[from] sqlx::Error),
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cannot upsert {found} payloads into the {expected} cache in one call")]
    MixedKinds { expected: DataKind, found: DataKind },
    #[error("scope is required for {0} entries")]
    MissingScope(DataKind),
}

/// Persistent cache of fetched upstream data.
///
/// Implementations must use upsert semantics keyed by `(key, scope)` so that
/// concurrent refreshes of the same key never produce duplicate rows.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the existing entries of `kind` for `keys`, scoped by world where applicable.
    async fn read(
        &self,
        kind: DataKind,
        keys: &[ItemId],
        scope: Option<&str>,
    ) -> Result<Vec<CacheEntry>, StoreError>;

    /// Insert or overwrite entries. All entries must share one kind.
    async fn upsert(&self, entries: &[CacheEntry]) -> Result<(), StoreError>;

    async fn read_counter(&self, kind: DataKind) -> Result<PerformanceCounter, StoreError>;

    async fn update_counter(
        &self,
        kind: DataKind,
        counter: PerformanceCounter,
    ) -> Result<(), StoreError>;
}

/// Ensure a non-empty batch is homogeneous and return its kind.
pub(crate) fn batch_kind(entries: &[CacheEntry]) -> Result<Option<DataKind>, StoreError> {
    let Some(first) = entries.first() else {
        return Ok(None);
    };
    let expected = first.kind();
    for entry in entries {
        let found = entry.kind();
        if found != expected {
            return Err(StoreError::MixedKinds { expected, found });
        }
        if expected.is_scoped() && entry.scope.is_none() {
            return Err(StoreError::MissingScope(expected));
        }
    }
    Ok(Some(expected))
}
