//! Known MIDI endpoints and their connection state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::MidiBackend;
use crate::device::{stable_name, DeviceDescriptor, DeviceList, DeviceState, PortType};
use crate::error::{Error, Result};
use crate::output::OutputWorker;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub(crate) struct OutputEntry {
    pub(crate) state: Arc<DeviceState>,
    pub(crate) worker: Arc<OutputWorker>,
}

/// A port as enumerated by the backend, already given its stable name.
#[derive(Debug, Clone)]
struct VisiblePort {
    name: String,
    real_name: String,
    port: usize,
}

/// Registry of input and output endpoints.
///
/// Descriptors are created by [`scan`](Self::scan) only. Outputs each own an
/// [`OutputWorker`] that serializes sends, probes and reconnects.
pub struct DeviceRegistry {
    backend: Arc<dyn MidiBackend>,
    inputs: DashMap<String, Arc<DeviceState>>,
    outputs: DashMap<String, OutputEntry>,
    scan_lock: Mutex<()>,
    timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn MidiBackend>) -> Self {
        Self::with_timeout(backend, DEFAULT_OPERATION_TIMEOUT)
    }

    pub fn with_timeout(backend: Arc<dyn MidiBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            inputs: DashMap::new(),
            outputs: DashMap::new(),
            scan_lock: Mutex::new(()),
            timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ==================== Scan ====================

    /// Enumerates ports and makes the visible set the registry's contents.
    ///
    /// New outputs are opened; known outputs that are disconnected are
    /// re-opened. Devices no longer visible are removed.
    pub async fn scan(&self) -> Result<Vec<DeviceDescriptor>> {
        let _guard = self.scan_lock.lock().await;
        let deadline = Instant::now() + self.timeout;

        let (input_ports, output_ports) = self.enumerate(deadline).await?;
        let inputs = assign_names(input_ports);
        let outputs = assign_names(output_ports);

        self.reconcile_inputs(&inputs);
        let pending = self.reconcile_outputs(&outputs);

        for (name, reply) in pending {
            match tokio::time::timeout_at(deadline, reply).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!(device = %name, error = %e, "Output not opened during scan"),
                Ok(Err(_)) => warn!(device = %name, "Output worker dropped attach request"),
                Err(_) => warn!(device = %name, "Output attach still pending at scan deadline"),
            }
        }

        let list = self.list();
        info!(
            inputs = list.inputs.len(),
            outputs = list.outputs.len(),
            "MIDI device scan complete"
        );
        Ok(list.inputs.into_iter().chain(list.outputs).collect())
    }

    async fn enumerate(&self, deadline: Instant) -> Result<(Vec<String>, Vec<String>)> {
        let backend = Arc::clone(&self.backend);
        let task = tokio::task::spawn_blocking(move || -> Result<(Vec<String>, Vec<String>)> {
            let inputs = backend.list_ports(PortType::Input)?;
            let outputs = backend.list_ports(PortType::Output)?;
            Ok((inputs, outputs))
        });

        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::MidiDevice(format!("Port enumeration failed: {e}"))),
            Err(_) => Err(Error::Timeout {
                operation: "Port scan",
                device: self.backend.name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    fn reconcile_inputs(&self, visible: &[VisiblePort]) {
        let seen: HashSet<&str> = visible.iter().map(|p| p.name.as_str()).collect();
        self.inputs.retain(|name, _| {
            let keep = seen.contains(name.as_str());
            if !keep {
                info!(device = %name, "MIDI input removed");
            }
            keep
        });

        for port in visible {
            let previous = self.inputs.get(&port.name).map(|e| Arc::clone(e.value()));
            match previous {
                Some(state) if state.is_connected() => {
                    state.update(|d| {
                        d.real_name = port.real_name.clone();
                        d.port = port.port;
                    });
                }
                Some(state) => {
                    info!(device = %port.name, port = %port.real_name, "MIDI input back");
                    self.replace_input(port, &state);
                }
                None => {
                    info!(device = %port.name, port = %port.real_name, "MIDI input found");
                    self.inputs.insert(
                        port.name.clone(),
                        DeviceState::new(descriptor(port, PortType::Input, true)),
                    );
                }
            }
        }
    }

    /// A returning input gets a fresh state, so monitor sessions opened on
    /// the old connection can tell they are stale.
    fn replace_input(&self, port: &VisiblePort, previous: &DeviceState) -> Arc<DeviceState> {
        let mut next = descriptor(port, PortType::Input, true);
        next.last_pc = previous.snapshot().last_pc;
        let state = DeviceState::new(next);
        self.inputs.insert(port.name.clone(), Arc::clone(&state));
        state
    }

    fn reconcile_outputs(&self, visible: &[VisiblePort]) -> Vec<(String, oneshot::Receiver<Result<()>>)> {
        let seen: HashSet<&str> = visible.iter().map(|p| p.name.as_str()).collect();
        // Dropping the entry drops the worker, which closes its connection.
        self.outputs.retain(|name, _| {
            let keep = seen.contains(name.as_str());
            if !keep {
                info!(device = %name, "MIDI output removed");
            }
            keep
        });

        let mut pending = Vec::new();
        for port in visible {
            let entry = match self.outputs.get(&port.name) {
                Some(entry) => {
                    let entry = entry.clone();
                    entry.state.update(|d| {
                        d.real_name = port.real_name.clone();
                        d.port = port.port;
                    });
                    if entry.state.is_connected() {
                        continue;
                    }
                    entry
                }
                None => {
                    let state = DeviceState::new(descriptor(port, PortType::Output, false));
                    let worker = match OutputWorker::spawn(Arc::clone(&self.backend), Arc::clone(&state)) {
                        Ok(worker) => Arc::new(worker),
                        Err(e) => {
                            warn!(device = %port.name, error = %e, "Could not start output worker");
                            continue;
                        }
                    };
                    info!(device = %port.name, port = %port.real_name, "MIDI output found");
                    let entry = OutputEntry { state, worker };
                    self.outputs.insert(port.name.clone(), entry.clone());
                    entry
                }
            };

            match entry.worker.attach(port.real_name.clone()) {
                Ok(reply) => pending.push((port.name.clone(), reply)),
                Err(e) => warn!(device = %port.name, error = %e, "Could not queue output attach"),
            }
        }
        pending
    }

    // ==================== Queries ====================

    /// Descriptor of `name`, outputs first.
    ///
    /// `name` may be the stable name, the backend label, or anything that
    /// slugs to the stable name.
    pub fn status(&self, name: &str) -> Result<DeviceDescriptor> {
        if let Some(entry) = self.output(name) {
            return Ok(entry.state.snapshot());
        }
        if let Some(state) = self.input(name) {
            return Ok(state.snapshot());
        }
        Err(Error::DeviceNotFound(name.to_string()))
    }

    /// Every known input and output as last scanned, connected or not.
    pub fn list(&self) -> DeviceList {
        let mut inputs: Vec<_> = self.inputs.iter().map(|e| e.value().snapshot()).collect();
        let mut outputs: Vec<_> = self.outputs.iter().map(|e| e.value().state.snapshot()).collect();
        inputs.sort_by_key(|d| d.port);
        outputs.sort_by_key(|d| d.port);
        DeviceList { inputs, outputs }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub(crate) fn output(&self, name: &str) -> Option<OutputEntry> {
        let key = resolve_key(&self.outputs, name, |e| e.state.snapshot())?;
        self.outputs.get(&key).map(|e| e.clone())
    }

    pub(crate) fn input(&self, name: &str) -> Option<Arc<DeviceState>> {
        let key = resolve_key(&self.inputs, name, |s| s.snapshot())?;
        self.inputs.get(&key).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn backend(&self) -> Arc<dyn MidiBackend> {
        Arc::clone(&self.backend)
    }

    // ==================== Connectivity ====================

    /// Re-resolves `name` against the backend's current ports and reopens it.
    ///
    /// On failure the descriptor is left as it was. Reconnecting a device
    /// that is already connected on the same port is a no-op.
    pub async fn reconnect(&self, name: &str) -> Result<DeviceDescriptor> {
        let deadline = Instant::now() + self.timeout;

        if let Some(entry) = self.output(name) {
            let device = entry.state.name();
            let (_, output_ports) = self.enumerate(deadline).await?;
            let Some(port) = find_port(&output_ports, &entry.state.snapshot()) else {
                return Err(Error::Connection {
                    device,
                    reason: "port is not present".to_string(),
                });
            };

            let reply = entry.worker.attach(port.real_name.clone())?;
            match tokio::time::timeout_at(deadline, reply).await {
                Ok(Ok(Ok(()))) => {
                    entry.state.update(|d| {
                        d.real_name = port.real_name.clone();
                        d.port = port.port;
                    });
                    info!(device = %device, "MIDI output reconnected");
                    Ok(entry.state.snapshot())
                }
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(_)) => Err(Error::WorkerStopped(device)),
                Err(_) => Err(Error::Timeout {
                    operation: "Reconnect",
                    device,
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            }
        } else if let Some(state) = self.input(name) {
            let device = state.name();
            let (input_ports, _) = self.enumerate(deadline).await?;
            let Some(port) = find_port(&input_ports, &state.snapshot()) else {
                return Err(Error::Connection {
                    device,
                    reason: "port is not present".to_string(),
                });
            };
            let current = state.snapshot();
            if current.connected && current.real_name == port.real_name {
                return Ok(current);
            }
            let port = VisiblePort {
                name: device.clone(),
                ..port
            };
            let state = self.replace_input(&port, &state);
            info!(device = %device, "MIDI input reconnected");
            Ok(state.snapshot())
        } else {
            Err(Error::DeviceNotFound(name.to_string()))
        }
    }

    /// Probes every connected device. Devices that stopped responding are
    /// marked disconnected but kept. Returns the descriptors that changed.
    ///
    /// Output probes queue behind in-flight sends on the device's worker; an
    /// output still busy at the deadline keeps its state.
    pub async fn health_check(&self) -> Result<Vec<DeviceDescriptor>> {
        let deadline = Instant::now() + self.timeout;
        let mut changed = Vec::new();

        let probes: Vec<_> = self
            .outputs
            .iter()
            .filter(|e| e.state.is_connected())
            .filter_map(|e| match e.worker.probe() {
                Ok(reply) => Some((Arc::clone(&e.state), reply)),
                Err(e) => {
                    debug!(error = %e, "Probe not queued");
                    None
                }
            })
            .collect();

        let connected_inputs: Vec<_> = self
            .inputs
            .iter()
            .filter(|e| e.is_connected())
            .map(|e| Arc::clone(e.value()))
            .collect();
        if !connected_inputs.is_empty() {
            let (input_ports, _) = self.enumerate(deadline).await?;
            for state in connected_inputs {
                if find_port(&input_ports, &state.snapshot()).is_none() {
                    state.set_connected(false);
                    warn!(device = %state.name(), "MIDI input disappeared");
                    changed.push(state.snapshot());
                }
            }
        }

        // Only the worker flips output connectivity. A probe still queued
        // behind a send at the deadline says nothing about the device.
        for (state, reply) in probes {
            match tokio::time::timeout_at(deadline, reply).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    warn!(device = %state.name(), "MIDI output failed health check");
                    changed.push(state.snapshot());
                }
                Ok(Err(_)) => {
                    // The worker is gone, so nothing can be sending.
                    state.set_connected(false);
                    warn!(device = %state.name(), "MIDI output worker stopped");
                    changed.push(state.snapshot());
                }
                Err(_) => debug!(device = %state.name(), "MIDI output busy, probe skipped"),
            }
        }

        Ok(changed)
    }
}

fn descriptor(port: &VisiblePort, port_type: PortType, connected: bool) -> DeviceDescriptor {
    DeviceDescriptor {
        name: port.name.clone(),
        real_name: port.real_name.clone(),
        port_type,
        port: port.port,
        connected,
        last_pc: None,
    }
}

/// Stable names for one direction's ports; duplicates get `_2`, `_3`, ...
fn assign_names(real_names: Vec<String>) -> Vec<VisiblePort> {
    let mut used: HashMap<String, usize> = HashMap::new();
    real_names
        .into_iter()
        .enumerate()
        .map(|(port, real_name)| {
            let base = stable_name(&real_name);
            let count = used.entry(base.clone()).or_insert(0);
            *count += 1;
            let name = if *count == 1 {
                base
            } else {
                format!("{base}_{count}")
            };
            VisiblePort {
                name,
                real_name,
                port,
            }
        })
        .collect()
}

/// Finds the port for an existing descriptor: exact label first, then the
/// stable name (the ALSA client number may have changed).
fn find_port(real_names: &[String], current: &DeviceDescriptor) -> Option<VisiblePort> {
    let ports = assign_names(real_names.to_vec());
    ports
        .iter()
        .find(|p| p.real_name == current.real_name)
        .or_else(|| ports.iter().find(|p| p.name == current.name))
        .cloned()
}

fn resolve_key<V>(
    map: &DashMap<String, V>,
    query: &str,
    describe: impl Fn(&V) -> DeviceDescriptor,
) -> Option<String> {
    if map.contains_key(query) {
        return Some(query.to_string());
    }
    if let Some(entry) = map.iter().find(|e| describe(e.value()).real_name == query) {
        return Some(entry.key().clone());
    }
    let slug = stable_name(query);
    map.contains_key(&slug).then_some(slug)
}
