//! MIDI I/O subsystem for RaspMIDI.
//!
//! Provides the backend abstraction (midir hardware or in-memory virtual
//! ports), the device registry with one output worker per device, command
//! dispatch, the inbound monitor and the dispatch command log.
//!
//! Feature gates: `midi-io` (hardware I/O via midir).

pub mod error;
pub use error::{Error, Result};

mod system;
pub use system::{MidiSystem, MidiSystemBuilder};

pub mod backend;
#[cfg(feature = "midi-io")]
pub use backend::MidirBackend;
pub use backend::{InputCallback, InputConnection, MidiBackend, OutputConnection, SentMessage, VirtualBackend};

pub mod device;
pub use device::{stable_name, DeviceDescriptor, DeviceList, PortType};

pub(crate) mod output;
pub(crate) mod ring;

pub mod registry;
pub use registry::{DeviceRegistry, DEFAULT_OPERATION_TIMEOUT};

pub mod dispatch;
pub use dispatch::{CommandDispatcher, DispatchReport, DispatchStage, DEFAULT_INTER_FRAME_DELAY};

pub mod command_log;
pub use command_log::{CommandLog, CommandLogEntry, DispatchOutcome, DEFAULT_COMMAND_LOG_CAPACITY};

pub mod monitor;
pub use monitor::{
    MidiMonitor, MonitorMode, MonitorStatus, ProgramChangeEvent, ReceivedBatch, ReceivedCommand,
    ReceivedKind, DEFAULT_MONITOR_CAPACITY,
};

pub use raspmidi_core::{MidiCommand, MidiFrame};
