//! In-process cache store backed by `DashMap`, used by tests and local runs
//! without a database.

use super::{CacheEntry, CacheStore, PerformanceCounter, StoreError, batch_kind};
use crate::data::models::{DataKind, ItemId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type EntryKey = (DataKind, ItemId, Option<String>);

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<EntryKey, CacheEntry>,
    counters: DashMap<DataKind, PerformanceCounter>,
    unavailable: AtomicBool,
    counters_unavailable: AtomicBool,
    upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every subsequent call fails until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail only counter reads and writes; cache rows stay reachable.
    pub fn set_counters_available(&self, available: bool) {
        self.counters_unavailable.store(!available, Ordering::SeqCst);
    }

    /// Look up a single entry.
    pub fn get(&self, kind: DataKind, key: ItemId, scope: Option<&str>) -> Option<CacheEntry> {
        self.entries
            .get(&(kind, key, scope.map(str::to_owned)))
            .map(|entry| entry.clone())
    }

    /// Number of entries of `kind` across all scopes.
    pub fn count(&self, kind: DataKind) -> usize {
        self.entries.iter().filter(|e| e.key().0 == kind).count()
    }

    /// Number of successful `upsert` calls.
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Seed an entry directly, bypassing availability checks.
    pub fn seed(&self, entry: CacheEntry) {
        self.entries
            .insert((entry.kind(), entry.key, entry.scope.clone()), entry);
    }

    fn check_counters_available(&self) -> Result<(), StoreError> {
        if self.counters_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory counters disabled".to_owned()));
        }
        Ok(())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn read(
        &self,
        kind: DataKind,
        keys: &[ItemId],
        scope: Option<&str>,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        self.check_available()?;
        Ok(keys
            .iter()
            .filter_map(|&key| self.get(kind, key, scope))
            .collect())
    }

    async fn upsert(&self, entries: &[CacheEntry]) -> Result<(), StoreError> {
        self.check_available()?;
        batch_kind(entries)?;
        for entry in entries {
            self.seed(entry.clone());
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_counter(&self, kind: DataKind) -> Result<PerformanceCounter, StoreError> {
        self.check_available()?;
        self.check_counters_available()?;
        Ok(self
            .counters
            .get(&kind)
            .map(|counter| *counter)
            .unwrap_or_default())
    }

    async fn update_counter(
        &self,
        kind: DataKind,
        counter: PerformanceCounter,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.check_counters_available()?;
        self.counters.insert(kind, counter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{CurrentPrice, Payload};
    use chrono::Utc;

    fn price(key: ItemId, world: &str, nq: i64) -> CacheEntry {
        CacheEntry {
            key,
            scope: Some(world.to_owned()),
            payload: Payload::Current(CurrentPrice {
                current_min_price_nq: Some(nq),
            }),
            last_refreshed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_per_key_and_scope() {
        let store = MemoryStore::new();
        store.upsert(&[price(5, "Gaia", 100)]).await.unwrap();
        store.upsert(&[price(5, "Gaia", 90)]).await.unwrap();
        store.upsert(&[price(5, "Ixion", 120)]).await.unwrap();

        assert_eq!(store.count(DataKind::CurrentPrice), 2);
        let gaia = store.get(DataKind::CurrentPrice, 5, Some("Gaia")).unwrap();
        assert_eq!(
            gaia.payload,
            Payload::Current(CurrentPrice {
                current_min_price_nq: Some(90)
            })
        );
    }

    #[tokio::test]
    async fn unavailable_store_rejects_reads() {
        let store = MemoryStore::new();
        store.set_available(false);
        let result = store.read(DataKind::CurrentPrice, &[1], Some("Gaia")).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn scoped_entries_require_a_world() {
        let store = MemoryStore::new();
        let mut entry = price(1, "Gaia", 10);
        entry.scope = None;
        let result = store.upsert(&[entry]).await;
        assert!(matches!(result, Err(StoreError::MissingScope(_))));
    }
}
