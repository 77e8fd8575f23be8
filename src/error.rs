//! # Error Types
//!
//! Every failure in the crate is either a rejected definition (caught while a
//! chord or score is being built), a sequencing invariant violation, or misuse
//! of the assistant's state machine. None of them is retried.
//!
//! ```
//! use accompanist::DefinitionError;
//!
//! let err = DefinitionError::NoBasicChords { id: "c1".to_string() };
//! assert_eq!(err.to_string(), "chord c1 has no basic chords");
//! ```

use thiserror::Error;

use crate::assistant::PerformanceState;

#[derive(Error, Debug)]
pub enum DefinitionError {
    /// The RON text could not be deserialised, e.g. an unknown attribute or a
    /// basic chord without `notes`.
    #[error("invalid definition: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("chords must have a non-empty id")]
    MissingId,

    #[error("chord {id} has no basic chords")]
    NoBasicChords { id: String },

    #[error(
        "basic chord {index} of chord {id} has {notes} notes but {velocities} velocities"
    )]
    NoteVelocityMismatch {
        id: String,
        index: usize,
        notes: usize,
        velocities: usize,
    },

    #[error("{field} value {value} in chord {id} is outside 0..=127")]
    ValueOutOfRange {
        id: String,
        field: &'static str,
        value: u32,
    },

    #[error("basic chord {index} of chord {id} defines a bank without a patch")]
    BankWithoutPatch { id: String, index: usize },

    #[error("slider {slider} of chord {id} has no values")]
    EmptySlider { id: String, slider: &'static str },

    /// Chord-off is enabled but no basic chord turned a note on.
    #[error("chord {id} must send at least one note")]
    NoNoteOffs { id: String },

    #[error("channel {0} is outside 0..=15")]
    InvalidChannel(u8),

    #[error("speed must be finite and greater than zero, got {0}")]
    InvalidSpeed(f64),

    #[error("slider period must be greater than zero")]
    InvalidSliderPeriod,

    #[error("the basic chords of chord {id} last longer than {max}ms", max = u32::MAX)]
    DurationOverflow { id: String },

    #[error("voice on channel {channel} lasts longer than {max}ms", max = u32::MAX)]
    VoiceDurationOverflow { channel: u8 },

    #[error("chord id {0} is used more than once")]
    DuplicateId(String),

    #[error("chord {id} has a score duration of 0ms")]
    ZeroDuration { id: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequencingError {
    #[error("moment at {timestamp}ms appended after {last}ms: tracks are append-only")]
    TrackOutOfOrder { timestamp: u32, last: u32 },

    #[error("moment at {position}ms is earlier than the current moment at {current}ms")]
    MomentOutOfOrder { position: u32, current: u32 },

    #[error("track {index} does not exist (sequence has {len} tracks)")]
    NoSuchTrack { index: usize, len: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssistantError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: PerformanceState,
    },

    #[error("illegal subsequence index {index:?} ({len} subsequences)")]
    IllegalIndex { index: Option<usize>, len: usize },

    /// A note-on reached a subsequence that is neither the start of the span
    /// nor a performer or rest subsequence.
    #[error("subsequence {index} has the wrong type")]
    SubsequenceType { index: usize },

    #[error(transparent)]
    Sequencing(#[from] SequencingError),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("MIDI init error: {0}")]
    Init(#[from] midir::InitError),

    #[error("no MIDI port available")]
    NoPort,

    #[error("could not connect to {port}: {message}")]
    Connect { port: String, message: String },

    #[error("MIDI send error: {0}")]
    Send(#[from] midir::SendError),

    #[error("output device is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Sequencing(#[from] SequencingError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not write score: {0}")]
    Serialize(#[from] ron::Error),
}
