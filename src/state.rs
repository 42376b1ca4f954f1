//! Application state shared by the web service and background services.

use crate::reference::ReferenceService;
use crate::refresh::JobRegistry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use ts_rs::TS;

/// Health status of a service.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ServiceStatus {
    Starting,
    Active,
    Disabled,
    Error,
}

/// Services self-report their health here; the status endpoint reads it.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, ServiceStatus>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(name.to_owned(), status);
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| *entry)
    }

    /// Snapshot of all statuses, sorted by service name.
    pub fn all(&self) -> Vec<(String, ServiceStatus)> {
        let mut all: Vec<_> = self
            .inner
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[derive(Clone)]
pub struct AppState {
    pub jobs: JobRegistry,
    pub reference: ReferenceService,
    pub service_statuses: ServiceStatusRegistry,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(jobs: JobRegistry, reference: ReferenceService) -> Self {
        Self {
            jobs,
            reference,
            service_statuses: ServiceStatusRegistry::new(),
            started_at: Instant::now(),
        }
    }
}
