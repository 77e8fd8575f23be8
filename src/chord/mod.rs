mod definition;
mod midi_chord;
mod moment;
mod slider;

pub use definition::{BasicChordDef, ChordAttributes, ChordDef, SlidersDef};
pub use midi_chord::{
    ChordMoments, DEFAULT_SLIDER_PERIOD_MS, MidiChord, MidiObject, MidiRest, ScorePlacement,
    build_chord_moments,
};
pub use moment::{Moment, PlacedMoment};
pub use slider::{SliderKind, fit_contour, sample_positions, slider_moments};
