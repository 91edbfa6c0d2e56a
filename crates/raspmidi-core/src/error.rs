//! Error types for the core addressing and encoding layer.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid bank '{0}': expected a letter from A to J")]
    InvalidBank(String),

    #[error("Invalid slot {0}: expected a value from 0 to 9")]
    InvalidSlot(i64),

    #[error("Invalid global patch address {0}: expected a value from 0 to 99")]
    InvalidGlobalAddress(i64),

    #[error("{0}")]
    Validation(String),

    #[error("Cannot encode {field}={value}: outside {min}..={max}")]
    Encoding {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
