mod midir;
mod transport;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::DeviceError;
use crate::events::{MAX_MIDI_CHANNELS, Message};

pub use self::midir::{MidirOutput, connect_input, input_port_names, output_port_names};
pub use transport::{RecordingTransport, ThreadedTransport, Transport, TransportCall, TransportEvent};

/// Anything that accepts raw MIDI bytes. `timestamp_ms` is the message's
/// position in the performance; devices that send immediately ignore it.
pub trait OutputDevice: Send {
    fn send(&mut self, bytes: &[u8], timestamp_ms: f64) -> Result<(), DeviceError>;
}

/// One device shared by every playback worker.
pub type SharedDevice = Arc<Mutex<Box<dyn OutputDevice>>>;

pub fn shared(device: impl OutputDevice + 'static) -> SharedDevice {
    Arc::new(Mutex::new(Box::new(device)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub bytes: Vec<u8>,
    pub timestamp_ms: f64,
}

/// Records everything sent to it. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// The sent bytes decoded as messages, skipping anything unparsable.
    pub fn messages(&self) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter_map(|sent| Message::from_bytes(&sent.bytes))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl OutputDevice for MemoryDevice {
    fn send(&mut self, bytes: &[u8], timestamp_ms: f64) -> Result<(), DeviceError> {
        self.sent.lock().push(SentMessage {
            bytes: bytes.to_vec(),
            timestamp_ms,
        });
        Ok(())
    }
}

/// Sends a note-off for every note on every channel.
pub fn all_notes_off(device: &mut dyn OutputDevice, timestamp_ms: f64) -> Result<(), DeviceError> {
    for channel in 0..MAX_MIDI_CHANNELS {
        for note in 0..128 {
            device.send(Message::note_off(channel, note, 127).as_bytes(), timestamp_ms)?;
        }
    }
    Ok(())
}
