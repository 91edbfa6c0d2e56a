//! Shared application state handed to every handler.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use raspmidi_core::Patch;
use raspmidi_midi_io::{DispatchReport, MidiSystem};
use raspmidi_store::PatchStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{MidiSelection, ServerConfig};
use crate::error::ApiError;

/// The patch most recently sent to its output device.
#[derive(Debug, Clone, Serialize)]
pub struct ActivePatch {
    pub patch: Patch,
    pub activated_at: DateTime<Utc>,
    /// `None` when the record was restored from disk at startup.
    pub report: Option<DispatchReport>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PatchStore>,
    pub midi: MidiSystem,
    pub config: Arc<ServerConfig>,
    pub started_at: DateTime<Utc>,
    active: Arc<ArcSwapOption<ActivePatch>>,
    selection: Arc<ArcSwap<MidiSelection>>,
}

impl AppState {
    /// Restores the active patch from the store and the MIDI selection from
    /// `midi_config.json`. An unreadable selection file falls back to the
    /// configured defaults.
    pub fn new(config: ServerConfig, store: PatchStore, midi: MidiSystem) -> Self {
        let defaults = MidiSelection::from_config(&config);
        let selection_path = config.midi_selection_path();
        let selection = MidiSelection::load(&selection_path, defaults.clone()).unwrap_or_else(|e| {
            warn!(path = %selection_path.display(), error = %e, "Ignoring saved MIDI selection");
            defaults
        });

        let active = store.active().map(|(patch, activated_at)| {
            info!(patch_id = patch.id, name = %patch.routing.name, "Restored active patch");
            Arc::new(ActivePatch {
                patch,
                activated_at,
                report: None,
            })
        });

        Self {
            store: Arc::new(store),
            midi,
            config: Arc::new(config),
            started_at: Utc::now(),
            active: Arc::new(ArcSwapOption::new(active)),
            selection: Arc::new(ArcSwap::from_pointee(selection)),
        }
    }

    pub fn active(&self) -> Option<Arc<ActivePatch>> {
        self.active.load_full()
    }

    /// Sends patch `id` to its output device and remembers it as active.
    pub async fn activate(&self, id: u64) -> Result<Arc<ActivePatch>, ApiError> {
        let patch = self.store.get(id)?;
        self.activate_patch(patch).await
    }

    /// The device already switched once the dispatch returns, so a failure
    /// to save the active record is logged rather than returned.
    pub async fn activate_patch(&self, patch: Patch) -> Result<Arc<ActivePatch>, ApiError> {
        let report = self.midi.dispatcher().activate(&patch).await?;
        info!(patch_id = patch.id, device = %report.device, "Patch active");
        let activated_at = Utc::now();
        if let Err(e) = self.store.set_active(patch.id, activated_at) {
            warn!(patch_id = patch.id, error = %e, "Could not save active patch");
        }
        let active = Arc::new(ActivePatch {
            patch,
            activated_at,
            report: Some(report),
        });
        self.active.store(Some(Arc::clone(&active)));
        Ok(active)
    }

    /// Forgets the active patch if it is `id` (after delete).
    pub fn forget_active(&self, id: u64) {
        self.active.rcu(|current| match current {
            Some(active) if active.patch.id == id => None,
            other => other.clone(),
        });
    }

    pub fn selection(&self) -> Arc<MidiSelection> {
        self.selection.load_full()
    }

    /// Saves `selection` to disk, then makes it current.
    pub fn set_selection(&self, selection: MidiSelection) -> Result<Arc<MidiSelection>, ApiError> {
        selection
            .save(&self.config.midi_selection_path())
            .map_err(|e| ApiError::internal(e, "Could not save MIDI settings"))?;
        let selection = Arc::new(selection);
        self.selection.store(Arc::clone(&selection));
        Ok(selection)
    }

    /// Input the server keeps monitored for Program Change routing, if any.
    pub fn controller_input(&self) -> Option<String> {
        if !self.config.route_program_changes {
            return None;
        }
        let selection = self.selection.load();
        if !selection.auto_connect {
            return None;
        }
        selection
            .input_device
            .clone()
            .filter(|d| !d.trim().is_empty())
    }
}
