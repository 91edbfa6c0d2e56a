//! Core types for RaspMIDI.
//!
//! - [`bank`]: bank letter + local slot <-> global patch address codec
//! - [`patch`]: patch model, request validation, patch-to-command mapping
//! - [`message`]: MIDI commands and strict wire encoding (channel messages and Zoom SysEx)

pub mod error;
pub use error::{Error, Result};

pub mod bank;
pub use bank::{BankSlot, BANK_LETTERS};

pub mod message;
pub use message::{MidiCommand, MidiFrame};

pub mod patch;
pub use patch::{CommandType, EffectMap, EffectState, Patch, PatchFields, Routing};
