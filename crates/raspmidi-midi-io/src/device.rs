//! Device descriptors and shared per-device state.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Input,
    Output,
}

/// A MIDI endpoint as the UI sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable identifier, derived from `real_name`.
    pub name: String,
    /// Port label reported by the MIDI backend.
    pub real_name: String,
    #[serde(rename = "type")]
    pub port_type: PortType,
    /// Port index at the last scan.
    pub port: usize,
    pub connected: bool,
    /// Last Program Change sent (outputs) or observed (inputs).
    pub last_pc: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceList {
    pub inputs: Vec<DeviceDescriptor>,
    pub outputs: Vec<DeviceDescriptor>,
}

/// Identifier for a backend port label that survives re-plugging.
///
/// ALSA labels carry a trailing `client:port` pair (`"ZOOM G Series 20:0"`)
/// that changes between boots; it is dropped before slugging.
pub fn stable_name(real_name: &str) -> String {
    let trimmed = real_name.trim();
    let base = match trimmed.rsplit_once(' ') {
        Some((head, tail)) if is_client_port(tail) => head,
        _ => trimmed,
    };

    let mut name = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') && !name.is_empty() {
            name.push('_');
        }
    }
    while name.ends_with('_') {
        name.pop();
    }
    if name.is_empty() {
        "midi_device".to_string()
    } else {
        name
    }
}

fn is_client_port(token: &str) -> bool {
    match token.split_once(':') {
        Some((client, port)) => {
            !client.is_empty()
                && !port.is_empty()
                && client.chars().all(|c| c.is_ascii_digit())
                && port.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Descriptor shared between the registry, its output worker and monitor
/// callbacks. Readers never block writers.
#[derive(Debug)]
pub(crate) struct DeviceState {
    descriptor: ArcSwap<DeviceDescriptor>,
}

impl DeviceState {
    pub(crate) fn new(descriptor: DeviceDescriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ArcSwap::from_pointee(descriptor),
        })
    }

    pub(crate) fn snapshot(&self) -> DeviceDescriptor {
        self.descriptor.load().as_ref().clone()
    }

    pub(crate) fn name(&self) -> String {
        self.descriptor.load().name.clone()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.descriptor.load().connected
    }

    pub(crate) fn update(&self, mut f: impl FnMut(&mut DeviceDescriptor)) {
        self.descriptor.rcu(|current| {
            let mut next = DeviceDescriptor::clone(current);
            f(&mut next);
            next
        });
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.update(|d| d.connected = connected);
    }

    pub(crate) fn set_last_pc(&self, program: u8) {
        self.update(|d| d.last_pc = Some(program));
    }
}
