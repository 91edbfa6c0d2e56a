//! Error types for the server and the HTTP error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Startup and configuration errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store: {0}")]
    Store(#[from] raspmidi_store::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] raspmidi_midi_io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failed request: status code plus a message safe to show in the UI.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub(crate) fn internal(detail: impl std::fmt::Display, message: &str) -> Self {
        error!(error = %detail, "{message}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<raspmidi_core::Error> for ApiError {
    fn from(e: raspmidi_core::Error) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<raspmidi_store::Error> for ApiError {
    fn from(e: raspmidi_store::Error) -> Self {
        use raspmidi_store::Error as E;
        match e {
            E::Validation(_) => Self::bad_request(e.to_string()),
            E::DuplicateChannel { .. } | E::DuplicateBankSlot { .. } => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            E::NotFound(_) => Self::not_found(e.to_string()),
            E::Io(_) | E::Serialization(_) => Self::internal(e, "Could not save patches"),
        }
    }
}

impl From<raspmidi_midi_io::Error> for ApiError {
    fn from(e: raspmidi_midi_io::Error) -> Self {
        use raspmidi_midi_io::Error as E;
        let status = match &e {
            E::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            E::Encoding(_) => StatusCode::BAD_REQUEST,
            E::DeviceDisconnected(_) | E::Connection { .. } | E::Busy(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            E::MidiPort(_) | E::MidiDevice(_) => StatusCode::SERVICE_UNAVAILABLE,
            E::Timeout { .. } | E::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
            E::WorkerStopped(_) => {
                return Self::internal(e.to_string(), "MIDI output is not available")
            }
        };
        Self::new(status, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_statuses() {
        let conflict: ApiError = raspmidi_store::Error::DuplicateChannel {
            channel: 3,
            patch: "Clean".into(),
        }
        .into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        assert!(conflict.message.contains("Clean"));

        let missing: ApiError = raspmidi_store::Error::NotFound(9).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let io: ApiError =
            raspmidi_store::Error::Io(std::io::Error::other("disk on fire")).into();
        assert_eq!(io.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!io.message.contains("disk on fire"));
    }

    #[test]
    fn test_midi_error_statuses() {
        let offline: ApiError =
            raspmidi_midi_io::Error::DeviceDisconnected("zoom_g3x".into()).into();
        assert_eq!(offline.status, StatusCode::SERVICE_UNAVAILABLE);

        let slow: ApiError = raspmidi_midi_io::Error::Timeout {
            operation: "Dispatch",
            device: "zoom_g3x".into(),
            timeout_ms: 5000,
        }
        .into();
        assert_eq!(slow.status, StatusCode::GATEWAY_TIMEOUT);
    }
}
