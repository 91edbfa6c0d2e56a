//! In-memory MIDI ports.
//!
//! Used by tests and by the server when no hardware is attached. Ports can be
//! plugged, unplugged, made unresponsive or made to refuse connections; every
//! byte sent is recorded and inbound traffic can be injected.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{InputCallback, InputConnection, MidiBackend, OutputConnection};
use crate::device::PortType;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub port: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct VirtualPort {
    real_name: String,
    port_type: PortType,
    plugged: bool,
    responsive: bool,
    refuse_open: bool,
    /// Overrides the backend-wide send delay for this port.
    send_delay: Option<Duration>,
}

struct Listener {
    id: u64,
    real_name: String,
    callback: Arc<Mutex<InputCallback>>,
}

#[derive(Default)]
struct VirtualState {
    ports: Vec<VirtualPort>,
    sent: Vec<SentMessage>,
    listeners: Vec<Listener>,
    next_listener: u64,
    send_delay: Duration,
}

impl VirtualState {
    fn port(&self, port_type: PortType, real_name: &str) -> Option<&VirtualPort> {
        self.ports
            .iter()
            .find(|p| p.port_type == port_type && p.real_name == real_name)
    }

    fn ports_named(&mut self, real_name: &str) -> impl Iterator<Item = &mut VirtualPort> {
        let real_name = real_name.to_string();
        self.ports
            .iter_mut()
            .filter(move |p| p.real_name == real_name)
    }
}

#[derive(Clone, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(self, real_name: &str) -> Self {
        self.add_port(PortType::Output, real_name);
        self
    }

    pub fn with_input(self, real_name: &str) -> Self {
        self.add_port(PortType::Input, real_name);
        self
    }

    /// Adds (or re-plugs) a port.
    pub fn add_port(&self, port_type: PortType, real_name: &str) {
        let mut state = self.state.lock();
        if let Some(port) = state
            .ports
            .iter_mut()
            .find(|p| p.port_type == port_type && p.real_name == real_name)
        {
            port.plugged = true;
            port.responsive = true;
            return;
        }
        state.ports.push(VirtualPort {
            real_name: real_name.to_string(),
            port_type,
            plugged: true,
            responsive: true,
            refuse_open: false,
            send_delay: None,
        });
    }

    /// Removes the device from port listings and breaks open connections.
    pub fn unplug(&self, real_name: &str) {
        let mut state = self.state.lock();
        for port in state.ports_named(real_name) {
            port.plugged = false;
            port.responsive = false;
        }
    }

    pub fn plug(&self, real_name: &str) {
        let mut state = self.state.lock();
        for port in state.ports_named(real_name) {
            port.plugged = true;
            port.responsive = true;
        }
    }

    /// Keeps the port listed but fails sends and probes, like a device that
    /// lost power behind a still-enumerated USB hub.
    pub fn set_responsive(&self, real_name: &str, responsive: bool) {
        let mut state = self.state.lock();
        for port in state.ports_named(real_name) {
            port.responsive = responsive;
        }
    }

    pub fn refuse_connections(&self, real_name: &str, refuse: bool) {
        let mut state = self.state.lock();
        for port in state.ports_named(real_name) {
            port.refuse_open = refuse;
        }
    }

    /// Time each send takes, to exercise batching and timeouts.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = delay;
    }

    /// Send delay for one port only.
    pub fn set_port_send_delay(&self, real_name: &str, delay: Duration) {
        let mut state = self.state.lock();
        for port in state.ports_named(real_name) {
            port.send_delay = Some(delay);
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().sent.clone()
    }

    pub fn sent_to(&self, real_name: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|m| m.port == real_name)
            .map(|m| m.bytes.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Delivers `bytes` to every open connection on input `real_name`.
    /// Returns how many listeners received it.
    pub fn inject(&self, real_name: &str, bytes: &[u8]) -> usize {
        let callbacks: Vec<_> = {
            let state = self.state.lock();
            match state.port(PortType::Input, real_name) {
                Some(port) if port.plugged => state
                    .listeners
                    .iter()
                    .filter(|l| l.real_name == real_name)
                    .map(|l| Arc::clone(&l.callback))
                    .collect(),
                _ => Vec::new(),
            }
        };
        for callback in &callbacks {
            let mut deliver = callback.lock();
            (*deliver)(bytes);
        }
        callbacks.len()
    }

    pub fn listener_count(&self, real_name: &str) -> usize {
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|l| l.real_name == real_name)
            .count()
    }
}

impl MidiBackend for VirtualBackend {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn list_ports(&self, port_type: PortType) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .ports
            .iter()
            .filter(|p| p.port_type == port_type && p.plugged)
            .map(|p| p.real_name.clone())
            .collect())
    }

    fn open_output(&self, real_name: &str) -> Result<Box<dyn OutputConnection>> {
        let state = self.state.lock();
        match state.port(PortType::Output, real_name) {
            Some(port) if port.plugged && !port.refuse_open => Ok(Box::new(VirtualOutput {
                state: Arc::clone(&self.state),
                real_name: real_name.to_string(),
            })),
            Some(port) if port.plugged => Err(Error::MidiPort(format!(
                "MIDI output '{}' refused the connection",
                port.real_name
            ))),
            _ => Err(Error::MidiDevice(format!(
                "MIDI output '{real_name}' not found"
            ))),
        }
    }

    fn open_input(
        &self,
        real_name: &str,
        callback: InputCallback,
    ) -> Result<Box<dyn InputConnection>> {
        let mut state = self.state.lock();
        match state.port(PortType::Input, real_name) {
            Some(port) if port.plugged && !port.refuse_open => {}
            Some(_) => {
                return Err(Error::MidiPort(format!(
                    "MIDI input '{real_name}' refused the connection"
                )))
            }
            None => {
                return Err(Error::MidiDevice(format!(
                    "MIDI input '{real_name}' not found"
                )))
            }
        }
        state.next_listener += 1;
        let id = state.next_listener;
        state.listeners.push(Listener {
            id,
            real_name: real_name.to_string(),
            callback: Arc::new(Mutex::new(callback)),
        });
        Ok(Box::new(VirtualInput {
            state: Arc::clone(&self.state),
            id,
        }))
    }
}

struct VirtualOutput {
    state: Arc<Mutex<VirtualState>>,
    real_name: String,
}

impl VirtualOutput {
    fn check_alive(&self, state: &VirtualState) -> Result<()> {
        match state.port(PortType::Output, &self.real_name) {
            Some(port) if port.plugged && port.responsive => Ok(()),
            _ => Err(Error::MidiPort(format!(
                "MIDI output '{}' is not responding",
                self.real_name
            ))),
        }
    }
}

impl OutputConnection for VirtualOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            self.check_alive(&state)?;
            let delay = state
                .port(PortType::Output, &self.real_name)
                .and_then(|p| p.send_delay)
                .unwrap_or(state.send_delay);
            state.sent.push(SentMessage {
                port: self.real_name.clone(),
                bytes: bytes.to_vec(),
            });
            delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn probe(&mut self) -> Result<()> {
        let state = self.state.lock();
        self.check_alive(&state)
    }
}

struct VirtualInput {
    state: Arc<Mutex<VirtualState>>,
    id: u64,
}

impl InputConnection for VirtualInput {}

impl Drop for VirtualInput {
    fn drop(&mut self) {
        self.state.lock().listeners.retain(|l| l.id != self.id);
    }
}
