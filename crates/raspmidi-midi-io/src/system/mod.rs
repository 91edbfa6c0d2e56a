//! Unified MIDI system: device registry, dispatcher, monitor and command log.
//!
//! ## Quick Start
//!
//! ```ignore
//! use raspmidi_midi_io::{MidiCommand, MidiSystem};
//!
//! let midi = MidiSystem::builder()
//!     .hardware()
//!     .route_program_changes(true)
//!     .build()?;
//!
//! // Discover devices
//! midi.registry().scan().await?;
//!
//! // Send a Program Change to the Zoom
//! midi.dispatcher()
//!     .send("zoom_g3x", MidiCommand::ProgramChange { channel: 0, program: 15 })
//!     .await?;
//!
//! // Watch the foot controller
//! midi.monitor().start("chocolate").await?;
//! ```

mod builder;

pub use builder::MidiSystemBuilder;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::command_log::CommandLog;
use crate::dispatch::CommandDispatcher;
use crate::monitor::{MidiMonitor, ProgramChangeEvent};
use crate::registry::DeviceRegistry;

// ============================================================================
// MidiSystem - Main Entry Point
// ============================================================================

/// Complete MIDI system. Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct MidiSystem {
    inner: Arc<MidiSystemInner>,
}

pub(crate) struct MidiSystemInner {
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) dispatcher: Arc<CommandDispatcher>,
    pub(crate) monitor: Arc<MidiMonitor>,
    pub(crate) command_log: Arc<CommandLog>,
    pub(crate) program_changes: Mutex<Option<UnboundedReceiver<ProgramChangeEvent>>>,
}

impl MidiSystem {
    pub fn builder() -> MidiSystemBuilder {
        MidiSystemBuilder::default()
    }

    /// Device discovery, status, reconnect and health checks.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// Sends commands and activates patches on output devices.
    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.inner.dispatcher
    }

    /// Inbound capture and Program Change forwarding.
    pub fn monitor(&self) -> &Arc<MidiMonitor> {
        &self.inner.monitor
    }

    /// Bounded record of outbound send attempts.
    pub fn command_log(&self) -> &Arc<CommandLog> {
        &self.inner.command_log
    }

    /// `midir` or `virtual`.
    pub fn backend_name(&self) -> &'static str {
        self.inner.registry.backend_name()
    }

    /// Receiver of inbound Program Changes. `None` if routing is disabled or
    /// the receiver was already taken.
    pub fn take_program_changes(&self) -> Option<UnboundedReceiver<ProgramChangeEvent>> {
        self.inner.program_changes.lock().take()
    }
}
