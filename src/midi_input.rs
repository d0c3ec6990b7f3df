use crate::error::{Error, Result};
use crate::types::*;
use crossbeam_channel::Sender;
use log::{debug, info};
use midir::{Ignore, MidiInput, MidiInputConnection};

const CLIENT_NAME: &str = "see-midi";

/// An open MIDI input port feeding the coordinator.
///
/// The midir callback runs on the driver's thread; it only parses bytes and
/// forwards them, so the interpreter stays single-threaded. Dropping the
/// source closes the port.
pub struct MidiInputSource {
    port_name: String,
    _connection: MidiInputConnection<()>,
}

/// Names of the MIDI input ports currently visible.
pub fn list_ports() -> Result<Vec<String>> {
    let input = MidiInput::new(CLIENT_NAME)?;
    Ok(input
        .ports()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            input
                .port_name(p)
                .unwrap_or_else(|_| format!("Unknown port {}", i))
        })
        .collect())
}

impl MidiInputSource {
    /// Open the first port whose name contains `name_hint`, or the first
    /// port at all when no hint is given.
    pub fn open(name_hint: Option<&str>, tx: Sender<InputEvent>, clock: SessionClock) -> Result<Self> {
        let mut input = MidiInput::new(CLIENT_NAME)?;
        input.ignore(Ignore::All);

        let ports = input.ports();
        let chosen = ports.iter().find(|p| match name_hint {
            Some(hint) => input
                .port_name(p)
                .map(|n| n.contains(hint))
                .unwrap_or(false),
            None => true,
        });
        let port = match chosen {
            Some(p) => p.clone(),
            None => {
                let wanted = name_hint.unwrap_or("any");
                return Err(Error::DeviceUnavailable(format!(
                    "no input port matching '{}' ({} port(s) present)",
                    wanted,
                    ports.len()
                )));
            }
        };
        let port_name = input
            .port_name(&port)
            .map_err(|e| Error::MidiPort(e.to_string()))?;

        info!("Opening MIDI input: {}", port_name);
        let connection = input.connect(
            &port,
            "see-midi-in",
            move |_stamp, bytes, _| match MidiMessage::from_bytes(bytes) {
                Some(message) => {
                    let event = MidiEvent {
                        timestamp_us: clock.now_us(),
                        message,
                    };
                    if tx.send(InputEvent::Midi(event)).is_err() {
                        debug!("Input channel closed, dropping {}", message);
                    }
                }
                None => debug!("Skipping MIDI bytes {:02X?}", bytes),
            },
            (),
        )?;

        Ok(Self {
            port_name,
            _connection: connection,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for MidiInputSource {
    fn drop(&mut self) {
        info!("Closing MIDI input: {}", self.port_name);
    }
}
