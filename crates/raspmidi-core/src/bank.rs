//! Bank/slot addressing for devices that organise patches as ten banks of ten.
//!
//! The UI shows a bank letter plus a local slot, while storage and the wire
//! protocol use a single global address (`bank_index * 10 + slot`). Every
//! conversion between the two representations goes through [`encode`] and
//! [`decode`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bank letters indexed by bank number.
pub const BANK_LETTERS: [char; 10] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J'];

pub const SLOTS_PER_BANK: u8 = 10;

pub const MAX_GLOBAL_ADDRESS: u8 = 99;

/// Index of a bank letter (`'A'` is 0). Case-insensitive.
pub fn bank_index(letter: char) -> Result<u8> {
    let upper = letter.to_ascii_uppercase();
    BANK_LETTERS
        .iter()
        .position(|&l| l == upper)
        .map(|i| i as u8)
        .ok_or_else(|| Error::InvalidBank(letter.to_string()))
}

/// Canonical (uppercase) bank letter from a user-supplied string such as `"b"`.
pub fn parse_bank(input: &str) -> Result<char> {
    let trimmed = input.trim();
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) => Ok(BANK_LETTERS[bank_index(letter)? as usize]),
        _ => Err(Error::InvalidBank(trimmed.to_string())),
    }
}

/// Bank letter + local slot to global address.
pub fn encode(bank: char, slot: i64) -> Result<u8> {
    let index = bank_index(bank)?;
    let slot = u8::try_from(slot)
        .ok()
        .filter(|s| *s < SLOTS_PER_BANK)
        .ok_or(Error::InvalidSlot(slot))?;
    Ok(index * SLOTS_PER_BANK + slot)
}

/// Global address to (bank letter, local slot). Exact inverse of [`encode`].
pub fn decode(global: i64) -> Result<(char, u8)> {
    let address = u8::try_from(global)
        .ok()
        .filter(|g| *g <= MAX_GLOBAL_ADDRESS)
        .ok_or(Error::InvalidGlobalAddress(global))?;
    let letter = BANK_LETTERS[(address / SLOTS_PER_BANK) as usize];
    Ok((letter, address % SLOTS_PER_BANK))
}

/// Global addresses of every slot in `bank`, in slot order.
pub fn bank_addresses(bank: char) -> Result<[u8; SLOTS_PER_BANK as usize]> {
    let base = bank_index(bank)? * SLOTS_PER_BANK;
    let mut addresses = [0u8; SLOTS_PER_BANK as usize];
    for (slot, address) in addresses.iter_mut().enumerate() {
        *address = base + slot as u8;
    }
    Ok(addresses)
}

/// A bank letter paired with a local slot.
///
/// Serialized as `{"bank": "B", "patch": 5}`, the shape the UI uses to grey
/// out occupied slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BankSlot {
    pub bank: char,
    #[serde(rename = "patch")]
    pub slot: u8,
}

impl BankSlot {
    pub fn new(bank: char, slot: i64) -> Result<Self> {
        let global = encode(bank, slot)?;
        Self::from_global(global as i64)
    }

    pub fn from_global(global: i64) -> Result<Self> {
        let (bank, slot) = decode(global)?;
        Ok(Self { bank, slot })
    }

    pub fn global(&self) -> Result<u8> {
        encode(self.bank, self.slot as i64)
    }
}

impl fmt::Display for BankSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bank, self.slot)
    }
}
