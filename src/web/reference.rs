//! World list and tax rate endpoints.

use axum::extract::{Path, State};
use axum::response::{Json, Response};
use std::collections::BTreeMap;

use crate::state::AppState;
use crate::web::error::{ApiError, internal};
use crate::web::routes::{cache, with_cache_control};

pub(super) async fn worlds(State(state): State<AppState>) -> Result<Response, ApiError> {
    let worlds = state
        .reference
        .worlds()
        .await
        .map_err(|e| internal(e, "Failed to load worlds"))?;
    Ok(with_cache_control(worlds, cache::REFERENCE))
}

pub(super) async fn tax_rates(
    State(state): State<AppState>,
    Path(world): Path<String>,
) -> Result<Response, ApiError> {
    let world = world.trim();
    if world.is_empty() {
        return Err(ApiError::bad_request("world must not be empty"));
    }
    let rates: BTreeMap<String, i32> = state
        .reference
        .tax_rates(world)
        .await
        .map_err(|e| internal(e, "Failed to load tax rates"))?;
    if rates.is_empty() {
        return Err(ApiError::not_found(format!("no tax rates known for {world}")));
    }
    Ok(with_cache_control(rates, cache::REFERENCE))
}
