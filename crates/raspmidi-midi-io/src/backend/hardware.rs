//! midir-backed hardware ports.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use super::{InputCallback, InputConnection, MidiBackend, OutputConnection};
use crate::device::PortType;
use crate::error::{Error, Result};

const CLIENT_NAME: &str = "raspmidi";

/// Stateless: every call opens a fresh midir client.
#[derive(Debug, Default, Clone, Copy)]
pub struct MidirBackend;

impl MidirBackend {
    pub fn new() -> Self {
        Self
    }
}

fn output_port_names(client: &MidiOutput) -> Vec<String> {
    client
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| {
            client
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {index}"))
        })
        .collect()
}

fn input_port_names(client: &MidiInput) -> Vec<String> {
    client
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| {
            client
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {index}"))
        })
        .collect()
}

impl MidiBackend for MidirBackend {
    fn name(&self) -> &'static str {
        "midir"
    }

    fn list_ports(&self, port_type: PortType) -> Result<Vec<String>> {
        match port_type {
            PortType::Input => Ok(input_port_names(&MidiInput::new(CLIENT_NAME)?)),
            PortType::Output => Ok(output_port_names(&MidiOutput::new(CLIENT_NAME)?)),
        }
    }

    fn open_output(&self, real_name: &str) -> Result<Box<dyn OutputConnection>> {
        let client = MidiOutput::new(CLIENT_NAME)?;
        let ports = client.ports();
        let port = ports
            .iter()
            .find(|p| client.port_name(p).is_ok_and(|name| name == real_name))
            .ok_or_else(|| Error::MidiDevice(format!("MIDI output '{real_name}' not found")))?;

        let connection = client.connect(port, "raspmidi-output")?;
        Ok(Box::new(MidirOutput {
            connection,
            real_name: real_name.to_string(),
        }))
    }

    fn open_input(
        &self,
        real_name: &str,
        mut callback: InputCallback,
    ) -> Result<Box<dyn InputConnection>> {
        let mut client = MidiInput::new(CLIENT_NAME)?;
        // SysEx and clock are filtered by default; the monitor wants everything.
        client.ignore(Ignore::None);
        let ports = client.ports();
        let port = ports
            .iter()
            .find(|p| client.port_name(p).is_ok_and(|name| name == real_name))
            .ok_or_else(|| Error::MidiDevice(format!("MIDI input '{real_name}' not found")))?;

        let connection = client.connect(
            port,
            "raspmidi-input",
            move |_timestamp, message, _| callback(message),
            (),
        )?;
        Ok(Box::new(MidirInput {
            _connection: connection,
        }))
    }
}

struct MidirOutput {
    connection: MidiOutputConnection,
    real_name: String,
}

impl OutputConnection for MidirOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection.send(bytes)?;
        Ok(())
    }

    /// midir has no device query, so a port that vanished from the port
    /// list counts as unresponsive.
    fn probe(&mut self) -> Result<()> {
        let client = MidiOutput::new("raspmidi-probe")?;
        if output_port_names(&client).iter().any(|n| *n == self.real_name) {
            Ok(())
        } else {
            Err(Error::MidiPort(format!(
                "MIDI output '{}' is no longer present",
                self.real_name
            )))
        }
    }
}

struct MidirInput {
    _connection: MidiInputConnection<()>,
}

impl InputConnection for MidirInput {}
