//! `/api/patches` handlers.

use std::str::FromStr;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use raspmidi_core::PatchFields;
use raspmidi_store::PatchOrder;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::response::{self, ApiResult};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    order: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult {
    let params = response::query(params)?;
    let order = match params.order.as_deref() {
        Some(order) => PatchOrder::from_str(order).map_err(ApiError::from)?,
        None => PatchOrder::default(),
    };
    let patches = state.store.list(order);
    let count = patches.len();
    response::envelope(patches, [("count", Value::from(count))])
}

pub async fn get(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    let id = response::path(id)?;
    response::data(state.store.get(id)?)
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<PatchFields>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let fields = response::body(payload)?;
    let patch = state.store.create(&fields)?;
    info!(patch_id = patch.id, name = %patch.routing.name, "Patch created");
    let body = response::data_with_message(patch, "Patch created")?;
    Ok((StatusCode::CREATED, body))
}

pub async fn update(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
    payload: Result<Json<PatchFields>, JsonRejection>,
) -> ApiResult {
    let id = response::path(id)?;
    let fields = response::body(payload)?;
    let patch = state.store.update(id, &fields)?;
    info!(patch_id = id, name = %patch.routing.name, "Patch updated");
    response::data_with_message(patch, "Patch updated")
}

pub async fn delete(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    let id = response::path(id)?;
    let patch = state.store.delete(id)?;
    state.forget_active(id);
    info!(patch_id = id, name = %patch.routing.name, "Patch deleted");
    response::message(format!("Patch '{}' deleted", patch.routing.name))
}

pub async fn used_channels(State(state): State<AppState>) -> ApiResult {
    response::data(state.store.used_channels())
}

pub async fn used_zoom_patches(State(state): State<AppState>) -> ApiResult {
    response::data(state.store.used_bank_slots())
}

pub async fn activate(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    let id = response::path(id)?;
    let active = state.activate(id).await?;
    response::data_with_message(
        active.as_ref(),
        format!("Patch '{}' activated", active.patch.routing.name),
    )
}

pub async fn active(State(state): State<AppState>) -> ApiResult {
    response::data(state.active().as_deref())
}
