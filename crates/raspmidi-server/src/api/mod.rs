//! HTTP routes. Every response is a JSON envelope with a `success` flag.

mod midi;
mod patches;
mod response;
mod system;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let patches = Router::new()
        .route("/", get(patches::list).post(patches::create))
        .route("/used_channels", get(patches::used_channels))
        .route("/used_zoom_patches", get(patches::used_zoom_patches))
        .route("/active", get(patches::active))
        .route(
            "/:id",
            get(patches::get).put(patches::update).delete(patches::delete),
        )
        .route("/:id/activate", post(patches::activate));

    let midi = Router::new()
        .route("/devices/list", get(midi::devices_list))
        .route("/devices/scan", post(midi::devices_scan))
        .route("/devices/status_detailed", get(midi::devices_status_detailed))
        .route("/devices/power_status", get(midi::devices_power_status))
        .route("/devices/:name/status", get(midi::device_status))
        .route("/devices/:name/reconnect", post(midi::device_reconnect))
        .route("/config", get(midi::config_get).put(midi::config_update))
        .route("/send", post(midi::send_command))
        .route("/pc", post(midi::program_change))
        .route("/cc", post(midi::control_change))
        .route("/note", post(midi::note))
        .route("/sysex/tuner", post(midi::sysex_tuner))
        .route("/sysex/patch", post(midi::sysex_patch))
        .route("/sysex/effect", post(midi::sysex_effect))
        .route("/zoom/patches/:bank_letter", get(midi::zoom_bank_patches))
        .route("/monitor/start", post(midi::monitor_start))
        .route("/monitor/stop", post(midi::monitor_stop))
        .route("/monitor/status", get(midi::monitor_status))
        .route("/commands/received", get(midi::commands_received))
        .route("/commands/clear", post(midi::commands_clear))
        .route("/commands/simulate", post(midi::commands_simulate))
        .route("/commands/log", get(midi::commands_log));

    Router::new()
        .nest("/api/patches", patches)
        .nest("/api/midi", midi)
        .route("/api/status", get(system::status))
        .route("/health", get(system::health))
        .with_state(state)
}
