//! Health and status handlers.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::trace;
use ts_rs::TS;

use crate::refresh::JobCounts;
use crate::state::{AppState, ServiceStatus};

#[derive(Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    uptime_seconds: u64,
    services: BTreeMap<String, ServiceStatus>,
    jobs: JobCounts,
}

pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Overall status is the worst service status, or disabled with no services.
fn overall(services: &BTreeMap<String, ServiceStatus>) -> ServiceStatus {
    if services.is_empty() {
        ServiceStatus::Disabled
    } else if services.values().any(|s| *s == ServiceStatus::Error) {
        ServiceStatus::Error
    } else if services.values().any(|s| *s == ServiceStatus::Starting) {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Active
    }
}

pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let services: BTreeMap<String, ServiceStatus> =
        state.service_statuses.all().into_iter().collect();

    Json(StatusResponse {
        status: overall(&services),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        services,
        jobs: state.jobs.counts(),
    })
}
