//! MidiSystem builder for wiring backend, registry, dispatcher and monitor.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::backend::{MidiBackend, VirtualBackend};
use crate::command_log::{CommandLog, DEFAULT_COMMAND_LOG_CAPACITY};
use crate::dispatch::{CommandDispatcher, DEFAULT_INTER_FRAME_DELAY};
use crate::error::{Error, Result};
use crate::monitor::{MidiMonitor, DEFAULT_MONITOR_CAPACITY};
use crate::registry::{DeviceRegistry, DEFAULT_OPERATION_TIMEOUT};

use super::{MidiSystem, MidiSystemInner};

pub struct MidiSystemBuilder {
    pub(super) backend: Option<Arc<dyn MidiBackend>>,
    pub(super) operation_timeout: Duration,
    pub(super) dispatch_timeout: Option<Duration>,
    pub(super) inter_frame_delay: Duration,
    pub(super) monitor_capacity: usize,
    pub(super) command_log_capacity: usize,
    pub(super) route_program_changes: bool,
}

impl Default for MidiSystemBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            dispatch_timeout: None,
            inter_frame_delay: DEFAULT_INTER_FRAME_DELAY,
            monitor_capacity: DEFAULT_MONITOR_CAPACITY,
            command_log_capacity: DEFAULT_COMMAND_LOG_CAPACITY,
            route_program_changes: false,
        }
    }
}

impl MidiSystemBuilder {
    pub fn backend(mut self, backend: impl MidiBackend) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Uses the midir hardware backend.
    #[cfg(feature = "midi-io")]
    pub fn hardware(self) -> Self {
        self.backend(crate::backend::MidirBackend::new())
    }

    /// Uses an empty in-memory backend.
    pub fn virtual_backend(self) -> Self {
        self.backend(VirtualBackend::new())
    }

    /// Timeout for scan, reconnect, dispatch and monitor start.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Dispatch timeout, when it should differ from the operation timeout.
    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = Some(timeout);
        self
    }

    /// Minimum gap between frames of one batch.
    pub fn inter_frame_delay(mut self, delay: Duration) -> Self {
        self.inter_frame_delay = delay;
        self
    }

    pub fn monitor_capacity(mut self, capacity: usize) -> Self {
        self.monitor_capacity = capacity;
        self
    }

    pub fn command_log_capacity(mut self, capacity: usize) -> Self {
        self.command_log_capacity = capacity;
        self
    }

    /// Forward inbound Program Changes; collect them with
    /// [`MidiSystem::take_program_changes`].
    pub fn route_program_changes(mut self, enabled: bool) -> Self {
        self.route_program_changes = enabled;
        self
    }

    pub fn build(self) -> Result<MidiSystem> {
        let backend = self
            .backend
            .ok_or_else(|| Error::MidiDevice("No MIDI backend configured".to_string()))?;
        let dispatch_timeout = self.dispatch_timeout.unwrap_or(self.operation_timeout);
        if self.operation_timeout.is_zero() || dispatch_timeout.is_zero() {
            return Err(Error::MidiDevice(
                "Operation timeout must be greater than zero".to_string(),
            ));
        }

        let registry = Arc::new(DeviceRegistry::with_timeout(
            backend,
            self.operation_timeout,
        ));
        let command_log = Arc::new(CommandLog::new(self.command_log_capacity));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&command_log),
            self.inter_frame_delay,
            dispatch_timeout,
        ));

        let (program_tx, program_rx) = if self.route_program_changes {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let monitor = Arc::new(MidiMonitor::new(
            Arc::clone(&registry),
            self.monitor_capacity,
            program_tx,
        ));

        Ok(MidiSystem {
            inner: Arc::new(MidiSystemInner {
                registry,
                dispatcher,
                monitor,
                command_log,
                program_changes: Mutex::new(program_rx),
            }),
        })
    }
}
