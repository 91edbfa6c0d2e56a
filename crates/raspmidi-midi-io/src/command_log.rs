//! Bounded log of dispatch attempts.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::ring::SequencedRing;

pub const DEFAULT_COMMAND_LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandLogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub command: String,
    pub frames: Vec<String>,
    pub outcome: DispatchOutcome,
    pub error: Option<String>,
}

/// Append-only, fixed-size record of what was sent where.
///
/// Appends never wait: if the log is busy the entry is dropped and counted.
pub struct CommandLog {
    ring: Mutex<SequencedRing<CommandLogEntry>>,
    dropped: AtomicU64,
}

impl CommandLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(SequencedRing::new(capacity)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record(
        &self,
        device: &str,
        command: &str,
        frames: Vec<String>,
        error: Option<String>,
    ) {
        let Some(mut ring) = self.ring.try_lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(device, "Command log busy, entry dropped");
            return;
        };
        let outcome = if error.is_some() {
            DispatchOutcome::Failed
        } else {
            DispatchOutcome::Sent
        };
        ring.push_with(|seq| CommandLogEntry {
            seq,
            timestamp: Utc::now(),
            device: device.to_string(),
            command: command.to_string(),
            frames,
            outcome,
            error,
        });
    }

    pub fn entries(&self, since: u64) -> Vec<CommandLogEntry> {
        self.ring.lock().since(since)
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> usize {
        self.ring.lock().clear()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_LOG_CAPACITY)
    }
}
