//! Patch record store for RaspMIDI.
//!
//! Holds every [`Patch`](raspmidi_core::Patch) and enforces, at write time,
//! that no two patches share an input channel or a zoom bank/slot.

pub mod error;
pub use error::{Error, Result};

mod order;
pub use order::PatchOrder;

mod store;
pub use store::{ActiveRecord, PatchStore, DEFAULT_MAX_PATCHES};
