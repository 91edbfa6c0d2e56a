//! Inbound MIDI monitor.
//!
//! Opens input ports on request and captures every message into a bounded
//! buffer that the UI polls with a cursor. Program Changes can additionally
//! be forwarded to a routing task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use midly::live::{LiveEvent, SystemCommon};
use midly::MidiMessage;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::backend::InputConnection;
use crate::device::DeviceState;
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;
use crate::ring::SequencedRing;

/// Buffer size of the original monitor.
pub const DEFAULT_MONITOR_CAPACITY: usize = 100;

const SIMULATED_DEVICE: &str = "simulated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceivedKind {
    NoteOn,
    NoteOff,
    ControlChange,
    ProgramChange,
    PitchBend,
    Aftertouch,
    Sysex,
    Realtime,
    Other,
}

/// One captured inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedCommand {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub device: String,
    #[serde(rename = "type")]
    pub kind: ReceivedKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch_bend: Option<i16>,
    pub bytes: String,
    pub simulated: bool,
}

/// Decoded fields of a raw message, before it gets a sequence number.
#[derive(Debug, Clone, Default, PartialEq)]
struct Decoded {
    kind: Option<ReceivedKind>,
    channel: Option<u8>,
    note: Option<u8>,
    velocity: Option<u8>,
    cc: Option<u8>,
    value: Option<u8>,
    program: Option<u8>,
    pitch_bend: Option<i16>,
}

fn decode(bytes: &[u8]) -> Decoded {
    let event = match LiveEvent::parse(bytes) {
        Ok(event) => event,
        Err(_) => {
            return Decoded {
                kind: Some(ReceivedKind::Other),
                ..Decoded::default()
            }
        }
    };

    match event {
        LiveEvent::Midi { channel, message } => {
            let channel = Some(channel.as_int());
            match message {
                // Running-status devices send Note On with velocity 0 as Note Off.
                MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Decoded {
                    kind: Some(ReceivedKind::NoteOff),
                    channel,
                    note: Some(key.as_int()),
                    velocity: Some(0),
                    ..Decoded::default()
                },
                MidiMessage::NoteOn { key, vel } => Decoded {
                    kind: Some(ReceivedKind::NoteOn),
                    channel,
                    note: Some(key.as_int()),
                    velocity: Some(vel.as_int()),
                    ..Decoded::default()
                },
                MidiMessage::NoteOff { key, vel } => Decoded {
                    kind: Some(ReceivedKind::NoteOff),
                    channel,
                    note: Some(key.as_int()),
                    velocity: Some(vel.as_int()),
                    ..Decoded::default()
                },
                MidiMessage::Controller { controller, value } => Decoded {
                    kind: Some(ReceivedKind::ControlChange),
                    channel,
                    cc: Some(controller.as_int()),
                    value: Some(value.as_int()),
                    ..Decoded::default()
                },
                MidiMessage::ProgramChange { program } => Decoded {
                    kind: Some(ReceivedKind::ProgramChange),
                    channel,
                    program: Some(program.as_int()),
                    ..Decoded::default()
                },
                MidiMessage::PitchBend { bend } => Decoded {
                    kind: Some(ReceivedKind::PitchBend),
                    channel,
                    pitch_bend: Some(bend.as_int()),
                    ..Decoded::default()
                },
                MidiMessage::Aftertouch { key, vel } => Decoded {
                    kind: Some(ReceivedKind::Aftertouch),
                    channel,
                    note: Some(key.as_int()),
                    value: Some(vel.as_int()),
                    ..Decoded::default()
                },
                MidiMessage::ChannelAftertouch { vel } => Decoded {
                    kind: Some(ReceivedKind::Aftertouch),
                    channel,
                    value: Some(vel.as_int()),
                    ..Decoded::default()
                },
            }
        }
        LiveEvent::Common(SystemCommon::SysEx(_)) => Decoded {
            kind: Some(ReceivedKind::Sysex),
            ..Decoded::default()
        },
        LiveEvent::Common(_) => Decoded {
            kind: Some(ReceivedKind::Other),
            ..Decoded::default()
        },
        LiveEvent::Realtime(_) => Decoded {
            kind: Some(ReceivedKind::Realtime),
            ..Decoded::default()
        },
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// An inbound Program Change, forwarded for patch routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramChangeEvent {
    pub device: String,
    pub channel: u8,
    pub program: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorMode {
    Real,
    Simulated,
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub active: bool,
    pub device: Option<String>,
    pub devices: Vec<String>,
    pub mode: MonitorMode,
    pub command_count: usize,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceivedBatch {
    pub commands: Vec<ReceivedCommand>,
    /// Pass back as `since` to get only newer commands.
    pub cursor: u64,
}

type Buffer = Arc<Mutex<SequencedRing<ReceivedCommand>>>;

/// Appends inbound messages to the monitor buffer. Runs on the backend's
/// input thread.
struct InboundSink {
    device: String,
    buffer: Buffer,
    state: Option<Arc<DeviceState>>,
    program_changes: Option<UnboundedSender<ProgramChangeEvent>>,
    simulated: bool,
}

impl InboundSink {
    fn receive(&self, bytes: &[u8]) -> ReceivedCommand {
        let decoded = decode(bytes);
        let command = self.buffer.lock().push_and_get(|seq| ReceivedCommand {
            seq,
            timestamp: Utc::now(),
            device: self.device.clone(),
            kind: decoded.kind.unwrap_or(ReceivedKind::Other),
            channel: decoded.channel,
            note: decoded.note,
            velocity: decoded.velocity,
            cc: decoded.cc,
            value: decoded.value,
            program: decoded.program,
            pitch_bend: decoded.pitch_bend,
            bytes: hex(bytes),
            simulated: self.simulated,
        });
        debug!(device = %self.device, kind = ?command.kind, bytes = %command.bytes, "MIDI received");

        if let (Some(channel), Some(program)) = (decoded.channel, decoded.program) {
            if let Some(state) = &self.state {
                state.set_last_pc(program);
            }
            if let Some(tx) = &self.program_changes {
                let _ = tx.send(ProgramChangeEvent {
                    device: self.device.clone(),
                    channel,
                    program,
                });
            }
        }
        command
    }
}

struct MonitorSession {
    started_at: DateTime<Utc>,
    /// Registry state the connection was opened against.
    input: Arc<DeviceState>,
    _connection: Mutex<Box<dyn InputConnection>>,
}

pub struct MidiMonitor {
    registry: Arc<DeviceRegistry>,
    buffer: Buffer,
    sessions: DashMap<String, MonitorSession>,
    control: tokio::sync::Mutex<()>,
    program_changes: Option<UnboundedSender<ProgramChangeEvent>>,
    simulated: AtomicBool,
    timeout: Duration,
}

impl MidiMonitor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        capacity: usize,
        program_changes: Option<UnboundedSender<ProgramChangeEvent>>,
    ) -> Self {
        let timeout = registry.timeout();
        Self {
            registry,
            buffer: Arc::new(Mutex::new(SequencedRing::new(capacity))),
            sessions: DashMap::new(),
            control: tokio::sync::Mutex::new(()),
            program_changes,
            simulated: AtomicBool::new(false),
            timeout,
        }
    }

    /// Starts capturing from input `device`. Already monitored devices are
    /// left as they are.
    pub async fn start(&self, device: &str) -> Result<MonitorStatus> {
        let _control = self.control.lock().await;

        self.drop_stale_sessions();
        let state = self
            .registry
            .input(device)
            .ok_or_else(|| Error::DeviceNotFound(device.to_string()))?;
        let name = state.name();
        if self.sessions.contains_key(&name) {
            return Ok(self.status(Some(&name)));
        }
        if !state.is_connected() {
            return Err(Error::DeviceDisconnected(name));
        }

        let sink = InboundSink {
            device: name.clone(),
            buffer: Arc::clone(&self.buffer),
            state: Some(Arc::clone(&state)),
            program_changes: self.program_changes.clone(),
            simulated: false,
        };
        let real_name = state.snapshot().real_name;
        let backend = self.registry.backend();
        let task = tokio::task::spawn_blocking(move || {
            backend.open_input(&real_name, Box::new(move |bytes| {
                sink.receive(bytes);
            }))
        });

        let connection = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(connection))) => connection,
            Ok(Ok(Err(e))) => {
                warn!(device = %name, error = %e, "Could not open MIDI input");
                return Err(Error::Connection {
                    device: name,
                    reason: e.to_string(),
                });
            }
            Ok(Err(e)) => return Err(Error::MidiDevice(format!("Input open task failed: {e}"))),
            Err(_) => {
                return Err(Error::Timeout {
                    operation: "Monitor start",
                    device: name,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        self.sessions.insert(
            name.clone(),
            MonitorSession {
                started_at: Utc::now(),
                input: state,
                _connection: Mutex::new(connection),
            },
        );
        info!(device = %name, "MIDI monitor started");
        Ok(self.status(Some(&name)))
    }

    /// Stops one session, or every session when `device` is `None`.
    /// Stopping a device that is not monitored is a no-op.
    pub async fn stop(&self, device: Option<&str>) -> MonitorStatus {
        let _control = self.control.lock().await;
        match device {
            Some(device) => {
                let key = self.session_key(device);
                if self.sessions.remove(&key).is_some() {
                    info!(device = %key, "MIDI monitor stopped");
                }
            }
            None => {
                let stopped = self.sessions.len();
                self.sessions.clear();
                self.simulated.store(false, Ordering::Relaxed);
                if stopped > 0 {
                    info!(sessions = stopped, "MIDI monitor stopped");
                }
            }
        }
        self.status(None)
    }

    /// Closes sessions whose input was removed, went offline, or came back
    /// as a new port since the session started. Returns the closed names.
    pub fn drop_stale_sessions(&self) -> Vec<String> {
        let mut dropped = Vec::new();
        self.sessions.retain(|name, session| {
            let live = self
                .registry
                .input(name)
                .is_some_and(|current| Arc::ptr_eq(&current, &session.input) && current.is_connected());
            if !live {
                dropped.push(name.clone());
            }
            live
        });
        for name in &dropped {
            info!(device = %name, "MIDI monitor session closed, input went away");
        }
        dropped
    }

    /// Monitor state, with `device` in focus when given.
    pub fn status(&self, device: Option<&str>) -> MonitorStatus {
        self.drop_stale_sessions();
        let mut sessions: Vec<(String, DateTime<Utc>)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().started_at))
            .collect();
        sessions.sort();

        let focus = match device {
            Some(device) => {
                let key = self.session_key(device);
                sessions.iter().find(|(name, _)| *name == key).cloned()
            }
            None => sessions.first().cloned(),
        };

        let mode = if !sessions.is_empty() {
            MonitorMode::Real
        } else if self.simulated.load(Ordering::Relaxed) {
            MonitorMode::Simulated
        } else {
            MonitorMode::Disconnected
        };

        MonitorStatus {
            active: focus.is_some(),
            device: focus
                .as_ref()
                .map(|(name, _)| name.clone())
                .or_else(|| device.map(str::to_string)),
            devices: sessions.iter().map(|(name, _)| name.clone()).collect(),
            mode,
            command_count: self.buffer.lock().len(),
            started_at: focus.map(|(_, started_at)| started_at),
        }
    }

    pub fn is_active(&self) -> bool {
        self.drop_stale_sessions();
        !self.sessions.is_empty()
    }

    /// Captured commands newer than `since`.
    pub fn received(&self, since: u64) -> ReceivedBatch {
        let buffer = self.buffer.lock();
        ReceivedBatch {
            commands: buffer.since(since),
            cursor: buffer.last_seq(),
        }
    }

    pub fn clear(&self) -> usize {
        let cleared = self.buffer.lock().clear();
        info!(cleared, "MIDI monitor buffer cleared");
        cleared
    }

    /// Records `bytes` as if received from `device`, without hardware.
    /// Program Changes are routed like real ones.
    pub fn simulate(&self, device: Option<&str>, bytes: &[u8]) -> Result<ReceivedCommand> {
        if bytes.is_empty() {
            return Err(raspmidi_core::Error::Validation(
                "simulated message is empty".to_string(),
            )
            .into());
        }
        let device = device
            .map(|d| self.session_key(d))
            .unwrap_or_else(|| SIMULATED_DEVICE.to_string());
        let sink = InboundSink {
            state: self.registry.input(&device),
            device,
            buffer: Arc::clone(&self.buffer),
            program_changes: self.program_changes.clone(),
            simulated: true,
        };
        self.simulated.store(true, Ordering::Relaxed);
        Ok(sink.receive(bytes))
    }

    fn session_key(&self, device: &str) -> String {
        if self.sessions.contains_key(device) {
            return device.to_string();
        }
        self.registry
            .input(device)
            .map(|state| state.name())
            .unwrap_or_else(|| device.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_channel_messages() {
        let pc = decode(&[0xC2, 7]);
        assert_eq!(pc.kind, Some(ReceivedKind::ProgramChange));
        assert_eq!(pc.channel, Some(2));
        assert_eq!(pc.program, Some(7));

        let cc = decode(&[0xB0, 64, 127]);
        assert_eq!(cc.kind, Some(ReceivedKind::ControlChange));
        assert_eq!((cc.cc, cc.value), (Some(64), Some(127)));

        let on = decode(&[0x90, 60, 100]);
        assert_eq!(on.kind, Some(ReceivedKind::NoteOn));
        assert_eq!(on.velocity, Some(100));

        let silent = decode(&[0x90, 60, 0]);
        assert_eq!(silent.kind, Some(ReceivedKind::NoteOff));

        let bend = decode(&[0xE0, 0x00, 0x40]);
        assert_eq!(bend.kind, Some(ReceivedKind::PitchBend));
        assert_eq!(bend.pitch_bend, Some(0));
    }

    #[test]
    fn test_decode_system_messages() {
        assert_eq!(decode(&[0xF0, 0x52, 0x00, 0xF7]).kind, Some(ReceivedKind::Sysex));
        assert_eq!(decode(&[0xF8]).kind, Some(ReceivedKind::Realtime));
        assert_eq!(decode(&[0x40]).kind, Some(ReceivedKind::Other));
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0xC0, 0x0F]), "C0 0F");
    }
}
