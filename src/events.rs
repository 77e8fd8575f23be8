use serde::{Deserialize, Serialize};

pub mod command {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const AFTERTOUCH: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_WHEEL: u8 = 0xE0;
}

pub mod control {
    pub const BANK_SELECT: u8 = 0;
    pub const MODULATION_WHEEL: u8 = 1;
    pub const DATA_ENTRY_COARSE: u8 = 6;
    pub const VOLUME: u8 = 7;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;
    pub const REGISTERED_PARAMETER_FINE: u8 = 100;
    pub const REGISTERED_PARAMETER_COARSE: u8 = 101;
}

pub const MAX_MIDI_CHANNELS: u8 = 16;

/// A channel message: status byte plus up to two data bytes.
///
/// Program change and channel pressure only carry one data byte on the wire,
/// [`Message::as_bytes`] takes care of that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    bytes: [u8; 3],
}

impl Message {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            bytes: [status, data1 & 0x7F, data2 & 0x7F],
        }
    }

    pub fn note_on(channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::new(command::NOTE_ON | (channel & 0x0F), pitch, velocity)
    }

    pub fn note_off(channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::new(command::NOTE_OFF | (channel & 0x0F), pitch, velocity)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::new(command::CONTROL_CHANGE | (channel & 0x0F), controller, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::new(command::PROGRAM_CHANGE | (channel & 0x0F), program, 0)
    }

    /// Pitch wheel with a 7-bit coarse value; the fine byte is always 0.
    pub fn pitch_wheel(channel: u8, value: u8) -> Self {
        Self::new(command::PITCH_WHEEL | (channel & 0x0F), 0, value)
    }

    /// Parses raw input bytes. Returns `None` for empty input or a data byte in
    /// status position.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status & 0x80 == 0 {
            return None;
        }
        let data1 = bytes.get(1).copied().unwrap_or(0);
        let data2 = bytes.get(2).copied().unwrap_or(0);
        Some(Self::new(status, data1, data2))
    }

    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// The status byte with the channel nibble cleared.
    pub fn command(&self) -> u8 {
        self.bytes[0] & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0x0F
    }

    pub fn data1(&self) -> u8 {
        self.bytes[1]
    }

    pub fn data2(&self) -> u8 {
        self.bytes[2]
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self.command() {
            command::PROGRAM_CHANGE | command::CHANNEL_PRESSURE => &self.bytes[..2],
            _ => &self.bytes,
        }
    }

    pub fn is_note_off(&self) -> bool {
        self.command() == command::NOTE_OFF
            || (self.command() == command::NOTE_ON && self.data2() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_change_is_two_bytes_on_the_wire() {
        let msg = Message::program_change(3, 42);
        assert_eq!(msg.as_bytes(), &[0xC3, 42]);
        assert_eq!(Message::note_on(1, 60, 100).as_bytes(), &[0x91, 60, 100]);
    }

    #[test]
    fn from_bytes_rejects_running_status() {
        assert_eq!(Message::from_bytes(&[]), None);
        assert_eq!(Message::from_bytes(&[60, 100]), None);
        let msg = Message::from_bytes(&[0x95, 64, 0]).unwrap();
        assert_eq!(msg.command(), command::NOTE_ON);
        assert_eq!(msg.channel(), 5);
        assert!(msg.is_note_off());
    }
}
