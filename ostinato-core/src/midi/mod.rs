//! MIDI input.
//!
//! [`MidiInputManager`] opens a port with midir and queues parsed events; the
//! host drains them and feeds each one to `LoopCore::handle_midi_event`.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use midir::{MidiInput, MidiInputConnection};

const CLIENT_NAME: &str = "ostinato";
/// Events buffered between the driver callback and the host.
const EVENT_QUEUE_SIZE: usize = 1024;

/// A timestamped MIDI event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    /// Driver timestamp in microseconds.
    pub timestamp_us: u64,
    pub kind: MidiEventKind,
}

impl MidiEvent {
    pub fn new(timestamp_us: u64, kind: MidiEventKind) -> Self {
        Self { timestamp_us, kind }
    }
}

/// Channel messages. Channels are zero-based as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEventKind {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// -8192..=8191, 0 = center
    PitchBend { channel: u8, value: i16 },
    Aftertouch { channel: u8, pressure: u8 },
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
}

#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// Error opening a MIDI port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiError(pub String);

impl std::fmt::Display for MidiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MIDI error: {}", self.0)
    }
}

impl std::error::Error for MidiError {}

pub struct MidiInputManager {
    connection: Option<MidiInputConnection<Sender<MidiEvent>>>,
    events: Option<Receiver<MidiEvent>>,
    connected_port_name: Option<String>,
}

impl MidiInputManager {
    pub fn new() -> Self {
        Self {
            connection: None,
            events: None,
            connected_port_name: None,
        }
    }

    /// Names of the available input ports.
    pub fn list_ports(&self) -> Vec<MidiPortInfo> {
        let Ok(midi_in) = MidiInput::new(CLIENT_NAME) else {
            return Vec::new();
        };
        midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                midi_in
                    .port_name(port)
                    .ok()
                    .map(|name| MidiPortInfo { index, name })
            })
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connected_port_name(&self) -> Option<&str> {
        self.connected_port_name.as_deref()
    }

    /// Connect to the first port whose name contains `device`, or the first
    /// port at all when `device` is None.
    pub fn connect_by_name(&mut self, device: Option<&str>) -> Result<(), MidiError> {
        let ports = self.list_ports();
        let port = match device {
            Some(device) => {
                let wanted = device.to_ascii_lowercase();
                ports
                    .iter()
                    .find(|p| p.name.to_ascii_lowercase().contains(&wanted))
            }
            None => ports.first(),
        };
        match port {
            Some(port) => self.connect(port.index),
            None => Err(MidiError(format!(
                "no MIDI input matching {}",
                device.unwrap_or("any device")
            ))),
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<(), MidiError> {
        self.disconnect();

        let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError(e.to_string()))?;
        let ports = midi_in.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| MidiError(format!("invalid port index: {}", port_index)))?;
        let port_name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_SIZE);
        let connection = midi_in
            .connect(
                port,
                "ostinato-input",
                |timestamp, message, tx: &mut Sender<MidiEvent>| {
                    if let Some(kind) = parse_midi_message(message) {
                        if let Err(TrySendError::Full(_)) =
                            tx.try_send(MidiEvent::new(timestamp, kind))
                        {
                            log::warn!(target: "midi", "input queue full, event dropped");
                        }
                    }
                },
                tx,
            )
            .map_err(|e| MidiError(e.to_string()))?;

        log::info!(target: "midi", "connected to {}", port_name);
        self.connection = Some(connection);
        self.events = Some(rx);
        self.connected_port_name = Some(port_name);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            if let Some(name) = self.connected_port_name.as_deref() {
                log::info!(target: "midi", "disconnected from {}", name);
            }
        }
        self.events = None;
        self.connected_port_name = None;
    }

    /// Next pending event, without blocking.
    pub fn poll_event(&self) -> Option<MidiEvent> {
        self.events.as_ref()?.try_recv().ok()
    }

    /// Drain every pending event.
    pub fn poll_events(&self) -> Vec<MidiEvent> {
        self.events
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }
}

impl Default for MidiInputManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MidiInputManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Parse a raw MIDI message. System messages and truncated data yield None.
pub fn parse_midi_message(data: &[u8]) -> Option<MidiEventKind> {
    let (&status, rest) = data.split_first()?;
    let channel = status & 0x0F;
    let byte = |i: usize| rest.get(i).copied();

    match status & 0xF0 {
        0x80 => Some(MidiEventKind::NoteOff {
            channel,
            note: byte(0)?,
        })
        .filter(|_| rest.len() >= 2),
        0x90 => {
            let note = byte(0)?;
            match byte(1)? {
                // Note On with velocity 0 is Note Off
                0 => Some(MidiEventKind::NoteOff { channel, note }),
                velocity => Some(MidiEventKind::NoteOn {
                    channel,
                    note,
                    velocity,
                }),
            }
        }
        0xA0 => Some(MidiEventKind::PolyAftertouch {
            channel,
            note: byte(0)?,
            pressure: byte(1)?,
        }),
        0xB0 => Some(MidiEventKind::ControlChange {
            channel,
            controller: byte(0)?,
            value: byte(1)?,
        }),
        0xC0 => Some(MidiEventKind::ProgramChange {
            channel,
            program: byte(0)?,
        }),
        0xD0 => Some(MidiEventKind::Aftertouch {
            channel,
            pressure: byte(0)?,
        }),
        0xE0 => {
            let lsb = byte(0)? as i16;
            let msb = byte(1)? as i16;
            Some(MidiEventKind::PitchBend {
                channel,
                value: ((msb << 7) | lsb) - 8192,
            })
        }
        _ => None,
    }
}
