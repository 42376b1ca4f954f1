#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketstats::data::models::{
    CurrentPrice, DataKind, HistoricalPrice, ItemId, ItemMetadata, Payload,
};
use marketstats::refresh::{JobRegistry, RefreshEngine, StalenessPolicy};
use marketstats::store::{CacheEntry, MemoryStore};
use marketstats::upstream::{Gateways, UpstreamError, UpstreamGateway};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A deterministic payload for `key` of `kind`.
pub fn payload(kind: DataKind, key: ItemId) -> Payload {
    match kind {
        DataKind::ItemMetadata => Payload::Item(ItemMetadata {
            name: format!("Item {key}"),
            icon_path: format!("i/000000/{key:06}"),
        }),
        DataKind::CurrentPrice => Payload::Current(CurrentPrice {
            current_min_price_nq: Some(i64::from(key) * 10),
        }),
        DataKind::HistoricalPrice => Payload::Historical(HistoricalPrice {
            nq_daily_sale_velocity: 1.5,
            average_price_per_unit: i64::from(key),
            num_items_sold: 3,
            possible_money_per_day: i64::from(key) * 2,
            median_stack_size: 1.0,
            median_price: f64::from(key),
        }),
    }
}

pub fn metadata(name: &str) -> Payload {
    Payload::Item(ItemMetadata {
        name: name.to_owned(),
        icon_path: String::new(),
    })
}

pub fn entry(
    kind: DataKind,
    key: ItemId,
    scope: Option<&str>,
    last_refreshed_at: DateTime<Utc>,
) -> CacheEntry {
    CacheEntry {
        key,
        scope: scope.map(str::to_owned),
        payload: payload(kind, key),
        last_refreshed_at,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub scope: Option<String>,
    pub keys: Vec<ItemId>,
}

/// Scripted upstream gateway.
///
/// By default resolves every key with [`payload`]. Scripted values replace
/// that behavior: only scripted keys resolve.
pub struct FakeGateway {
    kind: DataKind,
    scripted: Mutex<Option<HashMap<ItemId, Payload>>>,
    resolve_if: Mutex<Option<fn(ItemId) -> bool>>,
    failing: AtomicBool,
    latency_per_key: Mutex<Duration>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl FakeGateway {
    pub fn new(kind: DataKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            scripted: Mutex::new(None),
            resolve_if: Mutex::new(None),
            failing: AtomicBool::new(false),
            latency_per_key: Mutex::new(Duration::ZERO),
            gate: Mutex::new(None),
            entered: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Resolve only these keys, with these values.
    pub fn script(&self, values: impl IntoIterator<Item = (ItemId, Payload)>) {
        *self.scripted.lock().unwrap() = Some(values.into_iter().collect());
    }

    /// Resolve only keys matching `predicate`.
    pub fn resolve_if(&self, predicate: fn(ItemId) -> bool) {
        *self.resolve_if.lock().unwrap() = Some(predicate);
    }

    /// Fail every batch as if all retries were exhausted.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency_per_key(&self, latency: Duration) {
        *self.latency_per_key.lock().unwrap() = latency;
    }

    /// Block every batch until a permit is added to the returned semaphore.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Batches that reached the gateway, including ones still waiting at the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls().iter().map(|call| call.keys.len()).collect()
    }
}

#[async_trait]
impl UpstreamGateway for FakeGateway {
    fn kind(&self) -> DataKind {
        self.kind
    }

    async fn fetch_batch(
        &self,
        scope: Option<&str>,
        keys: &[ItemId],
    ) -> Result<HashMap<ItemId, Payload>, UpstreamError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        self.calls.lock().unwrap().push(Call {
            scope: scope.map(str::to_owned),
            keys: keys.to_vec(),
        });

        let latency = *self.latency_per_key.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency * keys.len() as u32).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Status {
                status: 503,
                url: "fake://upstream".to_owned(),
            });
        }

        let scripted = self.scripted.lock().unwrap().clone();
        let resolve_if = *self.resolve_if.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|&key| match &scripted {
                Some(values) => values.get(&key).cloned().map(|value| (key, value)),
                None if resolve_if.is_none_or(|resolves| resolves(key)) => {
                    Some((key, payload(self.kind, key)))
                }
                None => None,
            })
            .collect())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub metadata: Arc<FakeGateway>,
    pub current: Arc<FakeGateway>,
    pub historical: Arc<FakeGateway>,
    pub registry: JobRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(StalenessPolicy::default(), Duration::from_secs(3600))
    }

    pub fn with_policy(policy: StalenessPolicy, retention: Duration) -> Self {
        Self::build(policy, retention, 8)
    }

    /// Harness whose registry runs at most `max_jobs` jobs at once.
    pub fn with_max_jobs(max_jobs: usize) -> Self {
        Self::build(StalenessPolicy::default(), Duration::from_secs(3600), max_jobs)
    }

    fn build(policy: StalenessPolicy, retention: Duration, max_jobs: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let metadata = FakeGateway::new(DataKind::ItemMetadata);
        let current = FakeGateway::new(DataKind::CurrentPrice);
        let historical = FakeGateway::new(DataKind::HistoricalPrice);
        let gateways = Gateways::new(metadata.clone(), current.clone(), historical.clone());
        let engine = Arc::new(RefreshEngine::new(store.clone(), gateways, policy));
        Self {
            registry: JobRegistry::new(engine, max_jobs, retention),
            store,
            metadata,
            current,
            historical,
        }
    }
}

/// Poll `condition` until it holds, yielding to the runtime in between.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}
