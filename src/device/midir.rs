use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::info;

use super::OutputDevice;
use crate::error::DeviceError;

const CLIENT_NAME: &str = "accompanist";

pub fn output_port_names() -> Result<Vec<String>, DeviceError> {
    let midi_out = MidiOutput::new(CLIENT_NAME)?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect())
}

pub fn input_port_names() -> Result<Vec<String>, DeviceError> {
    let midi_in = MidiInput::new(CLIENT_NAME)?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect())
}

/// A hardware or virtual MIDI output port.
pub struct MidirOutput {
    connection: MidiOutputConnection,
    port_name: String,
}

impl MidirOutput {
    /// Connects to the first port whose name contains `hint`, or to the first
    /// port when there is no hint.
    pub fn connect(hint: Option<&str>) -> Result<Self, DeviceError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let ports = midi_out.ports();
        let port = match hint {
            Some(hint) => ports.iter().find(|port| {
                midi_out
                    .port_name(port)
                    .is_ok_and(|name| name.contains(hint))
            }),
            None => ports.first(),
        }
        .ok_or(DeviceError::NoPort)?;

        let port_name = midi_out.port_name(port).unwrap_or_default();
        let connection = midi_out
            .connect(port, "accompanist-output")
            .map_err(|e| DeviceError::Connect {
                port: port_name.clone(),
                message: e.to_string(),
            })?;

        info!(port = %port_name, "connected MIDI output");
        Ok(Self {
            connection,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl OutputDevice for MidirOutput {
    fn send(&mut self, bytes: &[u8], _timestamp_ms: f64) -> Result<(), DeviceError> {
        self.connection.send(bytes)?;
        Ok(())
    }
}

/// Connects an input port chosen the same way as [`MidirOutput::connect`].
/// `on_message` runs on midir's thread for every message; the connection
/// closes when the returned value is dropped.
pub fn connect_input<F>(
    hint: Option<&str>,
    mut on_message: F,
) -> Result<MidiInputConnection<()>, DeviceError>
where
    F: FnMut(&[u8]) + Send + 'static,
{
    let mut midi_in = MidiInput::new(CLIENT_NAME)?;
    midi_in.ignore(Ignore::Sysex | Ignore::Time | Ignore::ActiveSense);

    let ports = midi_in.ports();
    let port = match hint {
        Some(hint) => ports.iter().find(|port| {
            midi_in
                .port_name(port)
                .is_ok_and(|name| name.contains(hint))
        }),
        None => ports.first(),
    }
    .ok_or(DeviceError::NoPort)?;

    let port_name = midi_in.port_name(port).unwrap_or_default();
    let connection = midi_in
        .connect(
            port,
            "accompanist-input",
            move |_timestamp_us, message, _| on_message(message),
            (),
        )
        .map_err(|e| DeviceError::Connect {
            port: port_name.clone(),
            message: e.to_string(),
        })?;

    info!(port = %port_name, "connected MIDI input");
    Ok(connection)
}
