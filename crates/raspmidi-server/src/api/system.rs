use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use super::response::{self, ApiResult};
use crate::state::AppState;

pub async fn status(State(state): State<AppState>) -> ApiResult {
    let devices = state.midi.registry().list();
    let connected = devices
        .inputs
        .iter()
        .chain(devices.outputs.iter())
        .filter(|d| d.connected)
        .count();
    let uptime = Utc::now() - state.started_at;

    response::data(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "uptime_secs": uptime.num_seconds(),
        "backend": state.midi.backend_name(),
        "patches": state.store.len(),
        "max_patches": state.config.max_patches,
        "devices": {
            "inputs": devices.inputs.len(),
            "outputs": devices.outputs.len(),
            "connected": connected,
        },
        "monitor": state.midi.monitor().status(None),
        "active_patch": state.active().map(|a| a.patch.id),
    }))
}

/// Liveness probe; never touches MIDI ports.
pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
    }))
}
