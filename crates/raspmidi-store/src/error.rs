//! Error types for the patch store.

use raspmidi_core::BankSlot;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("Input channel {channel} is already used by patch '{patch}'")]
    DuplicateChannel { channel: u8, patch: String },

    #[error("Zoom patch {slot} is already used by patch '{patch}'")]
    DuplicateBankSlot { slot: BankSlot, patch: String },

    #[error("Patch {0} not found")]
    NotFound(u64),

    #[error("Failed to save patches: {0}")]
    Io(#[from] std::io::Error),

    #[error("Patch data is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<raspmidi_core::Error> for Error {
    fn from(e: raspmidi_core::Error) -> Self {
        Error::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
