//! # RaspMIDI - MIDI patch registry and device addressing
//!
//! Maps inbound controller messages to stored patches and sends them to
//! outboard gear such as a Zoom multi-effects pedal.
//!
//! ## Architecture
//!
//! RaspMIDI is an umbrella crate that coordinates:
//! - **raspmidi-core** - Bank/slot codec, MIDI commands and patch validation
//! - **raspmidi-store** - Durable patch store with uniqueness indexes
//! - **raspmidi-midi-io** - Device registry, dispatcher and monitor
//! - **raspmidi-server** - JSON HTTP API and the `raspmidi-server` binary
//!
//! ## Quick Start
//!
//! ```ignore
//! use raspmidi::prelude::*;
//!
//! let store = PatchStore::open("data/patches.json")?;
//! let midi = MidiSystem::builder().hardware().build()?;
//! midi.registry().scan().await?;
//!
//! let patch = store.get(1)?;
//! midi.dispatcher().activate(&patch).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `midi-hardware` - midir backend (default)
//! - `server` - HTTP API (default)

pub use raspmidi_core as core;
pub use raspmidi_core::{bank, BankSlot, CommandType, MidiCommand, MidiFrame, Patch, PatchFields, Routing};

pub use raspmidi_store as store;
pub use raspmidi_store::{PatchOrder, PatchStore};

pub use raspmidi_midi_io as midi;
pub use raspmidi_midi_io::{
    DeviceDescriptor, DeviceList, DeviceRegistry, MidiMonitor, MidiSystem, MidiSystemBuilder,
    VirtualBackend,
};

#[cfg(feature = "server")]
pub use raspmidi_server as server;

#[cfg(feature = "server")]
pub use raspmidi_server::ServerConfig;

mod error;
pub use error::{Error, Result};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{Error, Result};

    pub use crate::core::{bank, MidiCommand, Patch, PatchFields};
    pub use crate::midi::{DispatchReport, MidiSystem, VirtualBackend};
    pub use crate::store::{PatchOrder, PatchStore};

    #[cfg(feature = "server")]
    pub use crate::server::ServerConfig;
}
