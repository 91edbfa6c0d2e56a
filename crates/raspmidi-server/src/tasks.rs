//! Background tasks started alongside the HTTP server.

use std::time::Duration;

use raspmidi_midi_io::ProgramChangeEvent;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Keeps the monitor open on the selected controller input so its Program
/// Changes reach the router. Sessions on inputs that went away are closed
/// first. Returns whether the controller is being listened to.
pub async fn watch_controller(state: &AppState) -> bool {
    let monitor = state.midi.monitor();
    monitor.drop_stale_sessions();
    let Some(input) = state.controller_input() else {
        return false;
    };
    if monitor.status(Some(input.as_str())).active {
        return true;
    }
    match monitor.start(&input).await {
        Ok(_) => {
            info!(device = %input, "Listening to controller");
            true
        }
        Err(e) => {
            debug!(device = %input, error = %e, "Controller not available");
            false
        }
    }
}

/// Periodically probes every device so unplugged hardware shows as
/// disconnected without a manual scan, then retries the controller.
pub fn spawn_health_check(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; the startup scan already covered it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.midi.registry().health_check().await {
                Ok(changed) => {
                    for device in changed {
                        info!(
                            device = %device.name,
                            connected = device.connected,
                            "Device connection changed"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "Health check failed"),
            }
            watch_controller(&state).await;
        }
    })
}

/// Activates the stored patch whose input channel equals an inbound
/// Program Change number.
pub fn spawn_program_change_router(
    state: AppState,
    mut events: UnboundedReceiver<ProgramChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            route_program_change(&state, &event).await;
        }
        debug!("Program Change router stopped");
    })
}

pub(crate) async fn route_program_change(state: &AppState, event: &ProgramChangeEvent) -> bool {
    let Some(patch) = state.store.find_by_input_channel(event.program) else {
        debug!(
            device = %event.device,
            program = event.program,
            "No patch mapped to Program Change"
        );
        return false;
    };

    let patch_id = patch.id;
    match state.activate_patch(patch).await {
        Ok(active) => {
            info!(
                device = %event.device,
                program = event.program,
                patch_id,
                output = %active.patch.routing.output_device,
                "Patch activated from controller"
            );
            true
        }
        Err(e) => {
            warn!(
                device = %event.device,
                program = event.program,
                patch_id,
                error = %e,
                "Patch activation from controller failed"
            );
            false
        }
    }
}
