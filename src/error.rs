//! Centralized error type for the raspmidi umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] raspmidi_core::Error),

    #[error("Store: {0}")]
    Store(#[from] raspmidi_store::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] raspmidi_midi_io::Error),

    #[cfg(feature = "server")]
    #[error("Server: {0}")]
    Server(#[from] raspmidi_server::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
