//! MIDI backends.
//!
//! A backend enumerates ports and opens connections by port label. The
//! hardware backend uses midir (`midi-io` feature); the virtual backend keeps
//! everything in memory for tests and hardware-less runs.

#[cfg(feature = "midi-io")]
mod hardware;
mod virtual_ports;

#[cfg(feature = "midi-io")]
pub use hardware::MidirBackend;
pub use virtual_ports::{SentMessage, VirtualBackend};

use crate::device::PortType;
use crate::error::Result;

/// Called for every inbound message, on the backend's own thread.
pub type InputCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

pub trait MidiBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Port labels in port-index order.
    fn list_ports(&self, port_type: PortType) -> Result<Vec<String>>;

    fn open_output(&self, real_name: &str) -> Result<Box<dyn OutputConnection>>;

    fn open_input(&self, real_name: &str, callback: InputCallback)
        -> Result<Box<dyn InputConnection>>;
}

/// An open output port. Owned by exactly one output worker thread.
pub trait OutputConnection: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Cheap liveness check; `Err` means the device stopped responding.
    fn probe(&mut self) -> Result<()>;
}

/// An open input port. Dropping it closes the port.
pub trait InputConnection: Send {}
