//! Device transport - opening MIDI ports and moving wire messages
//!
//! A transport opens the input and output ports of one named device, forwards
//! every incoming message to a receive callback, and sends outgoing messages.
//! Failures never propagate: a missing device or port is logged and the
//! transport keeps running with sends returning `false`.

mod memory;

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::midi::{format_hex, MidiMessage};

pub use memory::{MemoryTransport, SentMessage};

/// Receive callback: message plus its timestamp in microseconds
pub type MessageCallback = Arc<dyn Fn(MidiMessage, u64) + Send + Sync>;

/// Primitive wire operations used by registries and drivers
pub trait Transport: Send + Sync {
    /// Send one message; `false` if it could not be delivered
    ///
    /// `timestamp` is in microseconds, None to send immediately.
    fn send(&self, message: &MidiMessage, timestamp: Option<u64>) -> bool;

    /// Close whichever ports are open; safe to call more than once
    fn close(&self);

    /// True if an output port is open
    fn has_output(&self) -> bool;

    /// True if an input port is open
    fn has_input(&self) -> bool;
}

/// How configured device names are matched against port names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PortMatch {
    /// Port name equals the device name
    #[default]
    Exact,
    /// Port name contains the device name, ignoring case
    Contains,
}

impl PortMatch {
    pub fn matches(&self, port_name: &str, device_name: &str) -> bool {
        match self {
            PortMatch::Exact => port_name == device_name,
            PortMatch::Contains => port_name
                .to_lowercase()
                .contains(&device_name.to_lowercase()),
        }
    }
}

/// Transport over real MIDI ports
pub struct MidiTransport {
    device_name: String,
    input: Mutex<Option<MidiInputConnection<()>>>,
    output: Mutex<Option<MidiOutputConnection>>,
}

impl MidiTransport {
    /// Open the ports of `device_name`
    ///
    /// The first matching input port becomes the receive source and the first
    /// matching output port the send target. Either may be missing.
    pub fn open(device_name: &str, port_match: PortMatch, on_message: MessageCallback) -> Self {
        let input = Self::open_input(device_name, port_match, on_message);
        let output = Self::open_output(device_name, port_match);

        match (input.is_some(), output.is_some()) {
            (true, true) => info!("MIDI device '{}' connected", device_name),
            (false, false) => info!(
                "MIDI device '{}' not available, running without hardware",
                device_name
            ),
            (has_in, has_out) => info!(
                "MIDI device '{}' partially connected (input: {}, output: {})",
                device_name, has_in, has_out
            ),
        }

        Self {
            device_name: device_name.to_string(),
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    fn open_input(
        device_name: &str,
        port_match: PortMatch,
        on_message: MessageCallback,
    ) -> Option<MidiInputConnection<()>> {
        let midi_in = match MidiInput::new("Knobs-GW-Input") {
            Ok(midi_in) => midi_in,
            Err(e) => {
                debug!("Failed to create MIDI input: {}", e);
                return None;
            }
        };

        let port = midi_in.ports().into_iter().find(|port| {
            midi_in
                .port_name(port)
                .map(|name| port_match.matches(&name, device_name))
                .unwrap_or(false)
        });

        let Some(port) = port else {
            debug!("MIDI \"from\" device '{}' doesn't exist", device_name);
            return None;
        };

        let connection = midi_in.connect(
            &port,
            "knobs-gw-in",
            move |timestamp, data, _| match MidiMessage::parse(data) {
                Some(message) => on_message(message, timestamp),
                None => trace!("Ignoring MIDI: {}", format_hex(data)),
            },
            (),
        );

        match connection {
            Ok(connection) => {
                debug!("MIDI IN opened: '{}'", device_name);
                Some(connection)
            }
            Err(e) => {
                debug!("MIDI \"from\" device '{}' cannot be opened: {}", device_name, e);
                None
            }
        }
    }

    fn open_output(device_name: &str, port_match: PortMatch) -> Option<MidiOutputConnection> {
        let midi_out = match MidiOutput::new("Knobs-GW-Output") {
            Ok(midi_out) => midi_out,
            Err(e) => {
                debug!("Failed to create MIDI output: {}", e);
                return None;
            }
        };

        let port = midi_out.ports().into_iter().find(|port| {
            midi_out
                .port_name(port)
                .map(|name| port_match.matches(&name, device_name))
                .unwrap_or(false)
        });

        let Some(port) = port else {
            debug!("MIDI \"to\" device '{}' doesn't exist", device_name);
            return None;
        };

        match midi_out.connect(&port, "knobs-gw-out") {
            Ok(connection) => {
                debug!("MIDI OUT opened: '{}'", device_name);
                Some(connection)
            }
            Err(e) => {
                debug!("MIDI \"to\" device '{}' cannot be opened: {}", device_name, e);
                None
            }
        }
    }
}

impl Transport for MidiTransport {
    fn send(&self, message: &MidiMessage, _timestamp: Option<u64>) -> bool {
        let mut output = self.output.lock();
        let Some(conn) = output.as_mut() else {
            trace!("MIDI message cannot be sent, '{}' has no output", self.device_name);
            return false;
        };

        let data = message.encode();
        match conn.send(&data) {
            Ok(()) => {
                trace!("Sent: {} | {}", format_hex(&data), message);
                true
            }
            Err(e) => {
                debug!("MIDI send to '{}' failed: {}", self.device_name, e);
                false
            }
        }
    }

    fn close(&self) {
        if let Some(conn) = self.input.lock().take() {
            conn.close();
            debug!("MIDI IN closed: '{}'", self.device_name);
        }
        if let Some(conn) = self.output.lock().take() {
            conn.close();
            debug!("MIDI OUT closed: '{}'", self.device_name);
        }
    }

    fn has_output(&self) -> bool {
        self.output.lock().is_some()
    }

    fn has_input(&self) -> bool {
        self.input.lock().is_some()
    }
}

impl Drop for MidiTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Names of the available MIDI input and output ports
pub fn list_ports() -> anyhow::Result<(Vec<String>, Vec<String>)> {
    let midi_in = MidiInput::new("Knobs-GW-Scanner")?;
    let inputs = midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect();

    let midi_out = MidiOutput::new("Knobs-GW-Scanner")?;
    let outputs = midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect();

    Ok((inputs, outputs))
}
