//! Error types for the MIDI I/O subsystem.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("MIDI device '{0}' not found")]
    DeviceNotFound(String),

    #[error("MIDI device '{0}' is disconnected; reconnect it and try again")]
    DeviceDisconnected(String),

    #[error("Could not connect to '{device}': {reason}")]
    Connection { device: String, reason: String },

    #[error("{operation} on '{device}' timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        device: String,
        timeout_ms: u64,
    },

    #[error(transparent)]
    Encoding(#[from] raspmidi_core::Error),

    #[error("Send to '{device}' stopped after {sent} of {total} messages")]
    Cancelled {
        device: String,
        sent: usize,
        total: usize,
    },

    #[error("Output queue for '{0}' is full")]
    Busy(String),

    #[error("Output worker for '{0}' is not running")]
    WorkerStopped(String),

    #[error("MIDI port error: {0}")]
    MidiPort(String),

    #[error("MIDI device error: {0}")]
    MidiDevice(String),
}

#[cfg(feature = "midi-io")]
impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::MidiDevice(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::MidiPort(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::MidiPort(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::SendError> for Error {
    fn from(e: midir::SendError) -> Self {
        Error::MidiPort(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
