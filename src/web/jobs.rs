//! Refresh job endpoints: start a job, poll its status, claim its result.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::data::models::{DataKind, ItemId, Payload};
use crate::refresh::{JobId, JobState, JobStatus};
use crate::state::AppState;
use crate::utils::parse_id_list;
use crate::web::error::ApiError;

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct JobCreated {
    pub job_id: String,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateJobRequest {
    pub kind: DataKind,
    pub keys: Vec<ItemId>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct JobResult {
    pub id: String,
    pub kind: DataKind,
    pub scope: Option<String>,
    pub state: JobState,
    pub elapsed_seconds: f64,
    pub items: BTreeMap<ItemId, Payload>,
}

fn parse_ids(raw: &str) -> Result<Vec<ItemId>, ApiError> {
    parse_id_list(raw).map_err(|e| ApiError::bad_request(e).with_details(json!({ "ids": raw })))
}

/// Unparseable ids can never name a job, so they are reported as unknown.
fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("job {raw} not found")))
}

fn start(
    state: &AppState,
    kind: DataKind,
    keys: Vec<ItemId>,
    scope: Option<String>,
) -> Result<Json<JobCreated>, ApiError> {
    let id = state.jobs.create_job(kind, keys, scope)?;
    Ok(Json(JobCreated {
        job_id: id.to_string(),
    }))
}

pub(super) async fn start_items(
    State(state): State<AppState>,
    Path(ids): Path<String>,
) -> Result<Json<JobCreated>, ApiError> {
    start(&state, DataKind::ItemMetadata, parse_ids(&ids)?, None)
}

pub(super) async fn start_market_current(
    State(state): State<AppState>,
    Path((world, ids)): Path<(String, String)>,
) -> Result<Json<JobCreated>, ApiError> {
    start(&state, DataKind::CurrentPrice, parse_ids(&ids)?, Some(world))
}

pub(super) async fn start_market_historical(
    State(state): State<AppState>,
    Path((world, ids)): Path<(String, String)>,
) -> Result<Json<JobCreated>, ApiError> {
    start(&state, DataKind::HistoricalPrice, parse_ids(&ids)?, Some(world))
}

pub(super) async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobRequest>,
) -> Result<Json<JobCreated>, ApiError> {
    start(&state, body.kind, body.keys, body.scope)
}

pub(super) async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.jobs.get_status(id)?))
}

/// Partial items while running; the final items exactly once after completion.
pub(super) async fn job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResult>, ApiError> {
    let id = parse_job_id(&id)?;
    let snapshot = state.jobs.get_result(id)?;
    Ok(Json(JobResult {
        id: snapshot.id.to_string(),
        kind: snapshot.kind,
        scope: snapshot.scope.clone(),
        state: snapshot.state,
        elapsed_seconds: snapshot.elapsed_seconds,
        items: (*snapshot.items).clone(),
    }))
}
