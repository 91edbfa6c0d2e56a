//! HTTP JSON API for RaspMIDI.
//!
//! Serves the patch registry, device control, ad-hoc MIDI commands and the
//! inbound monitor to the browser UI. The binary (`raspmidi-server`) loads a
//! [`ServerConfig`] and calls [`run`].

pub mod api;
pub mod config;
pub mod error;
pub mod state;
pub mod tasks;

pub use config::{BackendKind, MidiSelection, ServerConfig};
pub use error::{ApiError, Error, Result};
pub use state::{ActivePatch, AppState};

use axum::Router;
use raspmidi_midi_io::{MidiSystem, MidiSystemBuilder};
use raspmidi_store::PatchStore;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// The axum router with every route bound to `state`.
pub fn build_app(state: AppState) -> Router {
    api::router(state)
}

/// Builds the MIDI subsystem described by `config`.
pub fn build_midi(config: &ServerConfig) -> Result<MidiSystem> {
    let builder = MidiSystemBuilder::default()
        .operation_timeout(config.reconnect_timeout())
        .dispatch_timeout(config.dispatch_timeout())
        .inter_frame_delay(config.inter_frame_delay())
        .monitor_capacity(config.monitor_capacity)
        .command_log_capacity(config.command_log_capacity)
        .route_program_changes(config.route_program_changes);

    let builder = match config.backend {
        #[cfg(feature = "midi-io")]
        BackendKind::Midir => builder.hardware(),
        #[cfg(not(feature = "midi-io"))]
        BackendKind::Midir => {
            return Err(Error::Config(
                "backend \"midir\" needs the midi-io feature".to_string(),
            ))
        }
        BackendKind::Virtual => builder.virtual_backend(),
    };
    Ok(builder.build()?)
}

/// Opens the store, wires MIDI, starts background tasks and serves until
/// Ctrl-C.
pub async fn run(config: ServerConfig) -> Result<()> {
    config.validate()?;

    if !config.data_dir.exists() {
        std::fs::create_dir_all(&config.data_dir)?;
    }
    let store = PatchStore::open(config.patches_path())?.with_max_patches(config.max_patches);

    let midi = build_midi(&config)?;
    match midi.registry().scan().await {
        Ok(devices) => info!(
            backend = midi.backend_name(),
            devices = devices.len(),
            "Initial device scan"
        ),
        Err(e) => warn!(error = %e, "Initial device scan failed"),
    }

    let bind_addr = config.bind_addr();
    let state = AppState::new(config, store, midi);
    start_background(&state).await;

    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "RaspMIDI server listening");

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("RaspMIDI server stopped");
    Ok(())
}

/// Spawns the Program Change router and the health check, then opens the
/// controller input when routing is on.
pub async fn start_background(state: &AppState) {
    if let Some(events) = state.midi.take_program_changes() {
        tasks::spawn_program_change_router(state.clone(), events);
    }
    if let Some(period) = state.config.health_check_interval() {
        tasks::spawn_health_check(state.clone(), period);
    }
    if let Some(input) = state.controller_input() {
        if !tasks::watch_controller(state).await {
            warn!(device = %input, "Controller input not available, will retry after scans");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
