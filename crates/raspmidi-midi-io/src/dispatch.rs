//! Command dispatch: resolve the output, encode, hand the frames to the
//! device's worker and record the attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use raspmidi_core::{MidiCommand, MidiFrame, Patch};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command_log::CommandLog;
use crate::error::{Error, Result};
use crate::output::FrameBatch;
use crate::registry::DeviceRegistry;

pub const DEFAULT_INTER_FRAME_DELAY: Duration = Duration::from_millis(30);

/// Where a dispatch request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    Requested,
    Resolving,
    Encoding,
    Sent,
    Failed,
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub device: String,
    pub commands: Vec<String>,
    pub frames: Vec<String>,
    pub stage: DispatchStage,
}

/// Sets the batch's cancel flag when dropped, unless disarmed. Covers both
/// an elapsed timeout and a caller that stops polling the future.
struct CancelOnDrop {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl CancelOnDrop {
    fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
    log: Arc<CommandLog>,
    inter_frame_delay: Duration,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        log: Arc<CommandLog>,
        inter_frame_delay: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            log,
            inter_frame_delay,
            timeout,
        }
    }

    pub fn command_log(&self) -> &Arc<CommandLog> {
        &self.log
    }

    /// Sends one ad-hoc command to `device`.
    pub async fn send(&self, device: &str, command: MidiCommand) -> Result<DispatchReport> {
        self.dispatch(device, vec![command]).await
    }

    /// Sends the commands a patch maps to, to the patch's output device.
    pub async fn activate(&self, patch: &Patch) -> Result<DispatchReport> {
        info!(patch_id = patch.id, name = %patch.routing.name, "Activating patch");
        let commands = patch.commands()?;
        self.dispatch(&patch.routing.output_device, commands).await
    }

    /// Sends `commands` to `device` as one batch.
    ///
    /// Nothing is sent unless the device resolves, is connected and every
    /// command encodes. Frames already sent are not rolled back when a later
    /// frame fails or the batch is cancelled.
    pub async fn dispatch(&self, device: &str, commands: Vec<MidiCommand>) -> Result<DispatchReport> {
        let summary = summarize(&commands);
        debug!(device, stage = ?DispatchStage::Requested, commands = %summary);

        let result = self.run(device, &commands).await;
        match &result {
            Ok(report) => {
                self.log.record(&report.device, &summary, report.frames.clone(), None);
                debug!(device = %report.device, stage = ?DispatchStage::Sent, frames = report.frames.len());
            }
            Err(e) => {
                self.log.record(device, &summary, Vec::new(), Some(e.to_string()));
                warn!(device, stage = ?DispatchStage::Failed, error = %e, "MIDI dispatch failed");
            }
        }
        result
    }

    async fn run(&self, device: &str, commands: &[MidiCommand]) -> Result<DispatchReport> {
        debug!(device, stage = ?DispatchStage::Resolving);
        let entry = self
            .registry
            .output(device)
            .ok_or_else(|| Error::DeviceNotFound(device.to_string()))?;
        let descriptor = entry.state.snapshot();
        if !descriptor.connected {
            return Err(Error::DeviceDisconnected(descriptor.name));
        }

        debug!(device = %descriptor.name, stage = ?DispatchStage::Encoding);
        let mut frames: Vec<MidiFrame> = Vec::new();
        for command in commands {
            frames.extend(command.encode()?);
        }
        let hex: Vec<String> = frames.iter().map(MidiFrame::to_hex).collect();

        let cancel = Arc::new(AtomicBool::new(false));
        let mut guard = CancelOnDrop::new(Arc::clone(&cancel));
        let reply = entry.worker.send(FrameBatch {
            frames,
            spacing: self.inter_frame_delay,
            cancel,
        })?;

        let sent = match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::WorkerStopped(descriptor.name.clone())),
            Err(_) => Err(Error::Timeout {
                operation: "Dispatch",
                device: descriptor.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        if sent.is_ok() {
            guard.disarm();
        }
        sent?;

        Ok(DispatchReport {
            device: descriptor.name,
            commands: commands.iter().map(ToString::to_string).collect(),
            frames: hex,
            stage: DispatchStage::Sent,
        })
    }
}

fn summarize(commands: &[MidiCommand]) -> String {
    commands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
