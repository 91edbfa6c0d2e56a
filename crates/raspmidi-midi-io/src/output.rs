//! Per-device output worker.
//!
//! Each output device gets one thread that owns its connection and executes
//! commands in arrival order. Sends, probes and reconnects for a device are
//! therefore serialized without any lock shared between devices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use raspmidi_core::MidiFrame;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::backend::{MidiBackend, OutputConnection};
use crate::device::DeviceState;
use crate::error::{Error, Result};

const QUEUE_DEPTH: usize = 64;

/// Frames sent back to back, with `spacing` between consecutive frames.
pub(crate) struct FrameBatch {
    pub frames: Vec<MidiFrame>,
    pub spacing: Duration,
    pub cancel: Arc<AtomicBool>,
}

enum OutputCommand {
    Attach {
        real_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        batch: FrameBatch,
        reply: oneshot::Sender<Result<usize>>,
    },
    Probe {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

pub(crate) struct OutputWorker {
    device: String,
    command_sender: Sender<OutputCommand>,
}

impl OutputWorker {
    pub(crate) fn spawn(backend: Arc<dyn MidiBackend>, state: Arc<DeviceState>) -> Result<Self> {
        let device = state.name();
        let (command_sender, command_receiver) = bounded(QUEUE_DEPTH);

        thread::Builder::new()
            .name(format!("midi-out-{device}"))
            .spawn(move || output_thread(backend, state, command_receiver))
            .map_err(|e| Error::MidiDevice(format!("Failed to spawn output thread: {e}")))?;

        Ok(Self {
            device,
            command_sender,
        })
    }

    fn submit(&self, command: OutputCommand) -> Result<()> {
        self.command_sender.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => Error::Busy(self.device.clone()),
            TrySendError::Disconnected(_) => Error::WorkerStopped(self.device.clone()),
        })
    }

    /// Queues an open (or re-open) of `real_name`.
    pub(crate) fn attach(&self, real_name: String) -> Result<oneshot::Receiver<Result<()>>> {
        let (reply, rx) = oneshot::channel();
        self.submit(OutputCommand::Attach { real_name, reply })?;
        Ok(rx)
    }

    pub(crate) fn send(&self, batch: FrameBatch) -> Result<oneshot::Receiver<Result<usize>>> {
        let (reply, rx) = oneshot::channel();
        self.submit(OutputCommand::Send { batch, reply })?;
        Ok(rx)
    }

    pub(crate) fn probe(&self) -> Result<oneshot::Receiver<bool>> {
        let (reply, rx) = oneshot::channel();
        self.submit(OutputCommand::Probe { reply })?;
        Ok(rx)
    }
}

impl Drop for OutputWorker {
    fn drop(&mut self) {
        let _ = self.command_sender.send(OutputCommand::Shutdown);
    }
}

fn output_thread(
    backend: Arc<dyn MidiBackend>,
    state: Arc<DeviceState>,
    command_receiver: Receiver<OutputCommand>,
) {
    let mut connection: Option<Box<dyn OutputConnection>> = None;
    let mut attached_to = String::new();

    loop {
        match command_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(OutputCommand::Attach { real_name, reply }) => {
                let result = attach(&*backend, &state, &mut connection, &mut attached_to, real_name);
                let _ = reply.send(result);
            }
            Ok(OutputCommand::Send { batch, reply }) => {
                let result = send_batch(&state, &mut connection, batch);
                let _ = reply.send(result);
            }
            Ok(OutputCommand::Probe { reply }) => {
                let healthy = probe(&state, &mut connection);
                let _ = reply.send(healthy);
            }
            Ok(OutputCommand::Shutdown) => {
                connection.take();
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(device = %state.name(), "Output worker stopped");
}

fn attach(
    backend: &dyn MidiBackend,
    state: &DeviceState,
    connection: &mut Option<Box<dyn OutputConnection>>,
    attached_to: &mut String,
    real_name: String,
) -> Result<()> {
    // Already open on the same port and still answering: nothing to do.
    if state.is_connected() && *attached_to == real_name {
        if let Some(conn) = connection.as_mut() {
            if conn.probe().is_ok() {
                return Ok(());
            }
        }
    }

    match backend.open_output(&real_name) {
        Ok(conn) => {
            *connection = Some(conn);
            *attached_to = real_name;
            state.set_connected(true);
            info!(device = %state.name(), port = %attached_to, "MIDI output connected");
            Ok(())
        }
        Err(e) => {
            warn!(device = %state.name(), port = %real_name, error = %e, "MIDI output connect failed");
            Err(Error::Connection {
                device: state.name(),
                reason: e.to_string(),
            })
        }
    }
}

fn send_batch(
    state: &DeviceState,
    connection: &mut Option<Box<dyn OutputConnection>>,
    batch: FrameBatch,
) -> Result<usize> {
    let device = state.name();
    let total = batch.frames.len();

    let conn = match connection.as_mut() {
        Some(conn) if state.is_connected() => conn,
        _ => return Err(Error::DeviceDisconnected(device)),
    };

    let mut failure = None;
    for (index, frame) in batch.frames.iter().enumerate() {
        if index > 0 && !batch.spacing.is_zero() {
            thread::sleep(batch.spacing);
        }
        if batch.cancel.load(Ordering::SeqCst) {
            debug!(device = %device, sent = index, total, "Batch cancelled");
            return Err(Error::Cancelled {
                device,
                sent: index,
                total,
            });
        }
        if let Err(e) = conn.send(frame.as_bytes()) {
            failure = Some(e);
            break;
        }
        if let Some((_, program)) = frame.program_change() {
            state.set_last_pc(program);
        }
        debug!(device = %device, frame = %frame, "MIDI frame sent");
    }

    match failure {
        None => Ok(total),
        Some(e) => {
            // A port that rejects writes is treated as gone until reconnected.
            connection.take();
            state.set_connected(false);
            warn!(device = %device, error = %e, "MIDI send failed, device marked disconnected");
            Err(Error::Connection {
                device,
                reason: e.to_string(),
            })
        }
    }
}

fn probe(state: &DeviceState, connection: &mut Option<Box<dyn OutputConnection>>) -> bool {
    let healthy = connection
        .as_mut()
        .is_some_and(|conn| conn.probe().is_ok());
    if !healthy && state.is_connected() {
        connection.take();
        state.set_connected(false);
        warn!(device = %state.name(), "MIDI output stopped responding");
    }
    healthy
}
