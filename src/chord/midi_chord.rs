use tracing::debug;

use super::slider::slider_moments;
use super::{BasicChordDef, ChordDef, Moment, PlacedMoment};
use crate::error::{DefinitionError, Error, SequencingError};
use crate::events::{Message, control};

/// Rate at which slider values are sampled.
pub const DEFAULT_SLIDER_PERIOD_MS: u32 = 10;

const NOTE_OFF_VELOCITY: u8 = 127;

/// Where a chord or rest sits in the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScorePlacement {
    pub ms_position: u32,
    pub ms_duration: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChordMoments {
    pub moments: Vec<Moment>,
    pub ms_duration_of_basic_chords: u32,
    /// Positioned at the chord's score duration. Sent with the first moment of
    /// the following score object, never as part of this chord.
    pub final_chord_off_moment: Moment,
}

/// Converts a chord definition into its ordered moments.
pub fn build_chord_moments(
    channel: u8,
    def: &ChordDef,
    placement: ScorePlacement,
    slider_period_ms: u32,
) -> Result<ChordMoments, Error> {
    def.validate()?;
    if channel > 15 {
        return Err(DefinitionError::InvalidChannel(channel).into());
    }
    if slider_period_ms == 0 {
        return Err(DefinitionError::InvalidSliderPeriod.into());
    }

    let (chord_moments, ms_duration_of_basic_chords, final_chord_off_moment) =
        chord_moments(channel, def, placement.ms_duration)?;

    let mut moments = match &def.sliders {
        Some(sliders) if !sliders.is_empty() => {
            let sliders =
                slider_moments(channel, sliders, ms_duration_of_basic_chords, slider_period_ms);
            combine_moments(chord_moments, sliders)?
        }
        _ => chord_moments,
    };

    if let Some(first) = moments.first_mut() {
        first.chord_start = true;
    }

    Ok(ChordMoments {
        moments,
        ms_duration_of_basic_chords,
        final_chord_off_moment,
    })
}

fn attributes_moment(channel: u8, def: &ChordDef) -> Option<Moment> {
    let deviation = def.attributes.pitch_wheel_deviation?;
    // Select the pitch bend sensitivity RPN, then set it with coarse data entry.
    Some(Moment::with_messages(
        0,
        vec![
            Message::control_change(channel, control::REGISTERED_PARAMETER_COARSE, 0),
            Message::control_change(channel, control::REGISTERED_PARAMETER_FINE, 0),
            Message::control_change(channel, control::DATA_ENTRY_COARSE, deviation),
        ],
    ))
}

fn basic_chord_on_moment(channel: u8, bc: &BasicChordDef, ms_position: u32) -> Moment {
    let mut moment = Moment::new(ms_position);
    if let Some(bank) = bc.bank {
        moment.push(Message::control_change(channel, control::BANK_SELECT, bank));
    }
    if let Some(patch) = bc.patch {
        moment.push(Message::program_change(channel, patch));
    }
    for (&note, &velocity) in bc.notes.iter().zip(&bc.velocities) {
        moment.push(Message::note_on(channel, note, velocity));
    }
    moment
}

fn basic_chord_off_moment(channel: u8, bc: &BasicChordDef, ms_position: u32) -> Moment {
    Moment::with_messages(
        ms_position,
        bc.notes
            .iter()
            .map(|&note| Message::note_off(channel, note, NOTE_OFF_VELOCITY))
            .collect(),
    )
}

fn push_or_merge(moments: &mut Vec<Moment>, moment: Moment) {
    match moments.last_mut() {
        Some(last) if last.ms_position == moment.ms_position => last.merge(moment),
        _ => moments.push(moment),
    }
}

fn chord_moments(
    channel: u8,
    def: &ChordDef,
    ms_duration_in_score: u32,
) -> Result<(Vec<Moment>, u32, Moment), DefinitionError> {
    let mut moments = Vec::new();
    if let Some(moment) = attributes_moment(channel, def) {
        moments.push(moment);
    }

    let mut note_offs: Vec<u8> = Vec::new();
    let mut ms_position = 0;
    for bc in &def.basic_chords {
        if def.attributes.has_chord_off {
            note_offs.extend(&bc.notes);
        }
        push_or_merge(&mut moments, basic_chord_on_moment(channel, bc, ms_position));
        ms_position = ms_position.checked_add(bc.ms_duration).ok_or_else(|| {
            DefinitionError::DurationOverflow {
                id: def.attributes.id.clone(),
            }
        })?;
        if bc.has_chord_off {
            // chord-off always comes after its chord-on
            push_or_merge(&mut moments, basic_chord_off_moment(channel, bc, ms_position));
        }
    }

    let mut final_chord_off = Moment::new(ms_duration_in_score);
    if def.attributes.has_chord_off {
        if note_offs.is_empty() {
            return Err(DefinitionError::NoNoteOffs {
                id: def.attributes.id.clone(),
            });
        }
        let mut sent = [false; 128];
        for note in note_offs {
            if !std::mem::replace(&mut sent[usize::from(note & 0x7F)], true) {
                final_chord_off.push(Message::note_off(channel, note, NOTE_OFF_VELOCITY));
            }
        }
    }

    Ok((moments, ms_position, final_chord_off))
}

/// Merges chord and slider moments into one strictly increasing sequence.
/// Slider messages go first when both land on the same position.
fn combine_moments(
    chord_moments: Vec<Moment>,
    mut slider_moments: Vec<Moment>,
) -> Result<Vec<Moment>, SequencingError> {
    match slider_moments.len() {
        0 => return Ok(chord_moments),
        1 => {
            let mut chord_moments = chord_moments.into_iter();
            let mut first = slider_moments.remove(0);
            if let Some(chord_first) = chord_moments.next() {
                first.ms_position = chord_first.ms_position;
                first.merge(chord_first);
            }
            let mut combined = vec![first];
            combined.extend(chord_moments);
            return Ok(combined);
        }
        _ => {}
    }

    let mut combined: Vec<Moment> = Vec::with_capacity(chord_moments.len() + slider_moments.len());
    let mut append = |moment: Moment| -> Result<(), SequencingError> {
        match combined.last_mut() {
            Some(last) if moment.ms_position == last.ms_position => last.merge(moment),
            Some(last) if moment.ms_position < last.ms_position => {
                return Err(SequencingError::MomentOutOfOrder {
                    position: moment.ms_position,
                    current: last.ms_position,
                });
            }
            _ => combined.push(moment),
        }
        Ok(())
    };

    let mut chords = chord_moments.into_iter().peekable();
    let mut sliders = slider_moments.into_iter().peekable();
    loop {
        let take_slider = match (chords.peek(), sliders.peek()) {
            (Some(chord), Some(slider)) => slider.ms_position <= chord.ms_position,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (None, None) => break,
        };
        let next = if take_slider { sliders.next() } else { chords.next() };
        if let Some(moment) = next {
            append(moment)?;
        }
    }

    Ok(combined)
}

/// The runtime object for one chord in a track.
#[derive(Debug, Clone)]
pub struct MidiChord {
    pub ms_position_in_score: u32,
    pub ms_duration_in_score: u32,
    moments: Vec<Moment>,
    ms_duration_of_basic_chords: u32,
    final_chord_off_moment: Moment,
    repeat_moments: bool,
    // None once a non-repeating chord has been played through.
    next_index: Option<usize>,
    repeat_offset: u32,
}

impl MidiChord {
    pub fn new(
        channel: u8,
        def: &ChordDef,
        placement: ScorePlacement,
        slider_period_ms: u32,
    ) -> Result<Self, Error> {
        let built = build_chord_moments(channel, def, placement, slider_period_ms)?;
        debug!(
            id = %def.attributes.id,
            moments = built.moments.len(),
            "built chord"
        );

        // A chord whose basic chords take no time can't advance by repeating.
        let repeat_moments = def.attributes.repeat_moments && built.ms_duration_of_basic_chords > 0;

        Ok(Self {
            ms_position_in_score: placement.ms_position,
            ms_duration_in_score: placement.ms_duration,
            moments: built.moments,
            ms_duration_of_basic_chords: built.ms_duration_of_basic_chords,
            final_chord_off_moment: built.final_chord_off_moment,
            repeat_moments,
            next_index: Some(0),
            repeat_offset: 0,
        })
    }

    /// A chord played by someone else: one empty chord-start moment and an
    /// empty chord-off.
    pub fn silent(placement: ScorePlacement) -> Self {
        let mut moment = Moment::new(0);
        moment.chord_start = true;
        Self {
            ms_position_in_score: placement.ms_position,
            ms_duration_in_score: placement.ms_duration,
            moments: vec![moment],
            ms_duration_of_basic_chords: 0,
            final_chord_off_moment: Moment::new(placement.ms_duration),
            repeat_moments: false,
            next_index: Some(0),
            repeat_offset: 0,
        }
    }

    pub fn moments(&self) -> &[Moment] {
        &self.moments
    }

    pub fn ms_duration_of_basic_chords(&self) -> u32 {
        self.ms_duration_of_basic_chords
    }

    pub fn final_chord_off_moment(&self) -> &Moment {
        &self.final_chord_off_moment
    }

    pub fn repeats(&self) -> bool {
        self.repeat_moments
    }

    pub(crate) fn first_moment_mut(&mut self) -> &mut Moment {
        // build_chord_moments always yields at least the first basic chord-on
        &mut self.moments[0]
    }

    /// Rewinds the cursor. Returns the first moment, or `None` if it is empty.
    pub fn get_first_moment(&mut self) -> Option<PlacedMoment<'_>> {
        self.next_index = Some(0);
        self.repeat_offset = 0;
        let moment = &self.moments[0];
        (!moment.is_empty()).then_some(PlacedMoment {
            ms_position_in_chord: moment.ms_position,
            index: 0,
            moment,
        })
    }

    /// Advances the cursor. Repeating chords wrap around forever, each pass
    /// shifted by the duration of the basic chords. Non-repeating chords
    /// return `None` from the end of the list onwards.
    pub fn get_next_moment(&mut self) -> Option<PlacedMoment<'_>> {
        let mut index = self.next_index? + 1;
        if index == self.moments.len() {
            if self.repeat_moments {
                index = 0;
                self.repeat_offset = self
                    .repeat_offset
                    .saturating_add(self.ms_duration_of_basic_chords);
            } else {
                self.next_index = None;
                return None;
            }
        }
        self.next_index = Some(index);

        let moment = &self.moments[index];
        Some(PlacedMoment {
            ms_position_in_chord: moment.ms_position.saturating_add(self.repeat_offset),
            index,
            moment,
        })
    }
}

/// A rest: one empty rest-start moment that never repeats.
#[derive(Debug, Clone)]
pub struct MidiRest {
    pub ms_position_in_score: u32,
    pub ms_duration_in_score: u32,
    moment: Moment,
}

impl MidiRest {
    pub fn new(placement: ScorePlacement) -> Self {
        let mut moment = Moment::new(0);
        moment.rest_start = true;
        Self {
            ms_position_in_score: placement.ms_position,
            ms_duration_in_score: placement.ms_duration,
            moment,
        }
    }

    pub fn moment(&self) -> &Moment {
        &self.moment
    }

    pub fn get_first_moment(&self) -> Option<PlacedMoment<'_>> {
        (!self.moment.is_empty()).then_some(PlacedMoment {
            ms_position_in_chord: 0,
            index: 0,
            moment: &self.moment,
        })
    }

    pub fn get_next_moment(&self) -> Option<PlacedMoment<'_>> {
        None
    }
}

#[derive(Debug, Clone)]
pub enum MidiObject {
    Chord(MidiChord),
    Rest(MidiRest),
}

impl MidiObject {
    pub fn ms_position_in_score(&self) -> u32 {
        match self {
            MidiObject::Chord(chord) => chord.ms_position_in_score,
            MidiObject::Rest(rest) => rest.ms_position_in_score,
        }
    }

    pub fn ms_duration_in_score(&self) -> u32 {
        match self {
            MidiObject::Chord(chord) => chord.ms_duration_in_score,
            MidiObject::Rest(rest) => rest.ms_duration_in_score,
        }
    }

    pub fn final_chord_off_moment(&self) -> Option<&Moment> {
        match self {
            MidiObject::Chord(chord) => Some(chord.final_chord_off_moment()),
            MidiObject::Rest(_) => None,
        }
    }

    pub(crate) fn first_moment_mut(&mut self) -> &mut Moment {
        match self {
            MidiObject::Chord(chord) => chord.first_moment_mut(),
            MidiObject::Rest(rest) => &mut rest.moment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::{ChordAttributes, SlidersDef};
    use crate::events::command;

    fn chord(basic_chords: Vec<BasicChordDef>) -> ChordDef {
        ChordDef {
            attributes: ChordAttributes::new("c1"),
            basic_chords,
            sliders: None,
        }
    }

    fn placement(ms_duration: u32) -> ScorePlacement {
        ScorePlacement {
            ms_position: 1000,
            ms_duration,
        }
    }

    fn positions(moments: &[Moment]) -> Vec<u32> {
        moments.iter().map(|m| m.ms_position).collect()
    }

    #[test]
    fn basic_chords_produce_on_and_off_moments() {
        let def = chord(vec![
            BasicChordDef::new(100, vec![60, 64], vec![100, 90]),
            BasicChordDef::new(50, vec![62], vec![80]),
        ]);
        let built = build_chord_moments(0, &def, placement(150), 10).unwrap();

        assert_eq!(positions(&built.moments), vec![0, 100, 150]);
        assert_eq!(built.ms_duration_of_basic_chords, 150);
        assert!(built.moments[0].chord_start);
        assert_eq!(
            built.moments[0].messages,
            vec![Message::note_on(0, 60, 100), Message::note_on(0, 64, 90)]
        );
        // off of the first basic chord merged with on of the second
        assert_eq!(
            built.moments[1].messages,
            vec![
                Message::note_off(0, 60, 127),
                Message::note_off(0, 64, 127),
                Message::note_on(0, 62, 80),
            ]
        );
        assert_eq!(built.moments[2].messages, vec![Message::note_off(0, 62, 127)]);
    }

    #[test]
    fn overlong_chords_are_not_built() {
        let def = chord(vec![
            BasicChordDef::new(u32::MAX, vec![60], vec![100]),
            BasicChordDef::new(1, vec![62], vec![100]),
        ]);
        let err = build_chord_moments(0, &def, placement(100), 10).unwrap_err();
        assert!(matches!(
            err,
            Error::Definition(DefinitionError::DurationOverflow { .. })
        ));
    }

    #[test]
    fn final_chord_off_has_each_note_once() {
        let def = chord(vec![
            BasicChordDef::new(10, vec![60, 64], vec![100, 100]),
            BasicChordDef::new(10, vec![64, 67, 60], vec![100, 100, 100]),
            BasicChordDef::new(10, vec![60], vec![100]),
        ]);
        let built = build_chord_moments(3, &def, placement(400), 10).unwrap();

        let off = &built.final_chord_off_moment;
        assert_eq!(off.ms_position, 400);
        assert_eq!(
            off.messages,
            vec![
                Message::note_off(3, 60, 127),
                Message::note_off(3, 64, 127),
                Message::note_off(3, 67, 127),
            ]
        );
        assert!(!built.moments.iter().any(|m| m.ms_position == 400));
    }

    #[test]
    fn disabled_chord_off_still_yields_a_positioned_moment() {
        let mut def = chord(vec![BasicChordDef::new(10, vec![60], vec![100])]);
        def.attributes.has_chord_off = false;
        let built = build_chord_moments(0, &def, placement(80), 10).unwrap();
        assert_eq!(built.final_chord_off_moment.ms_position, 80);
        assert!(built.final_chord_off_moment.is_empty());
    }

    #[test]
    fn attributes_bank_and_patch_come_first() {
        let mut def = chord(vec![BasicChordDef::new(10, vec![60], vec![100])]);
        def.attributes.pitch_wheel_deviation = Some(12);
        def.basic_chords[0].bank = Some(1);
        def.basic_chords[0].patch = Some(40);
        def.basic_chords[0].has_chord_off = false;
        let built = build_chord_moments(1, &def, placement(10), 10).unwrap();

        assert_eq!(built.moments.len(), 1);
        assert_eq!(
            built.moments[0].messages,
            vec![
                Message::control_change(1, control::REGISTERED_PARAMETER_COARSE, 0),
                Message::control_change(1, control::REGISTERED_PARAMETER_FINE, 0),
                Message::control_change(1, control::DATA_ENTRY_COARSE, 12),
                Message::control_change(1, control::BANK_SELECT, 1),
                Message::program_change(1, 40),
                Message::note_on(1, 60, 100),
            ]
        );
    }

    #[test]
    fn zero_length_basic_chord_merges_its_off() {
        let def = chord(vec![
            BasicChordDef::new(0, vec![60], vec![100]),
            BasicChordDef::new(20, vec![62], vec![100]),
        ]);
        let built = build_chord_moments(0, &def, placement(20), 10).unwrap();
        assert_eq!(positions(&built.moments), vec![0, 20]);
        assert_eq!(built.moments[0].messages.len(), 3);
    }

    #[test]
    fn sliders_merge_before_chord_messages() {
        let mut def = chord(vec![BasicChordDef::new(40, vec![60], vec![100])]);
        def.sliders = Some(SlidersDef {
            pitch_wheel: Some(vec![64, 127]),
            ..Default::default()
        });
        let built = build_chord_moments(0, &def, placement(40), 10).unwrap();

        assert_eq!(positions(&built.moments), vec![0, 10, 20, 30, 40]);
        assert_eq!(built.moments[0].messages[0].command(), command::PITCH_WHEEL);
        assert_eq!(built.moments[0].messages[1], Message::note_on(0, 60, 100));
        assert!(built.moments[0].chord_start);
        assert_eq!(built.moments[4].messages, vec![Message::note_off(0, 60, 127)]);
        assert!(
            built
                .moments
                .windows(2)
                .all(|w| w[0].ms_position < w[1].ms_position)
        );
    }

    #[test]
    fn a_single_slider_moment_joins_the_first_chord_moment() {
        let mut def = chord(vec![BasicChordDef::new(100, vec![60], vec![100])]);
        def.sliders = Some(SlidersDef {
            pan: Some(vec![10]),
            ..Default::default()
        });
        let built = build_chord_moments(0, &def, placement(100), 10).unwrap();
        assert_eq!(positions(&built.moments), vec![0, 100]);
        assert_eq!(
            built.moments[0].messages,
            vec![
                Message::control_change(0, control::PAN, 10),
                Message::note_on(0, 60, 100),
            ]
        );
    }

    #[test]
    fn invalid_definition_is_rejected_before_building() {
        let def = chord(vec![]);
        assert!(matches!(
            build_chord_moments(0, &def, placement(0), 10),
            Err(Error::Definition(DefinitionError::NoBasicChords { .. }))
        ));
    }

    #[test]
    fn repeating_cursor_shifts_each_pass() {
        let def = chord(vec![
            BasicChordDef::new(100, vec![60], vec![100]),
            BasicChordDef::new(50, vec![62], vec![100]),
        ]);
        let mut chord = MidiChord::new(0, &def, placement(1000), 10).unwrap();
        let first_pass = positions(chord.moments());
        let len = first_pass.len();
        let total = chord.ms_duration_of_basic_chords();

        assert!(chord.get_first_moment().is_some());
        let mut yielded = Vec::new();
        for _ in 0..2 * len {
            let placed = chord.get_next_moment().expect("repeating chords never end");
            yielded.push(placed.ms_position_in_chord);
        }
        for k in 0..len {
            assert_eq!(yielded[len - 1 + k], first_pass[k] + total);
        }
    }

    #[test]
    fn non_repeating_cursor_stays_exhausted() {
        let mut def = chord(vec![
            BasicChordDef::new(100, vec![60], vec![100]),
            BasicChordDef::new(50, vec![62], vec![100]),
        ]);
        def.attributes.repeat_moments = false;
        let mut chord = MidiChord::new(0, &def, placement(150), 10).unwrap();
        let len = chord.moments().len();

        assert!(chord.get_first_moment().is_some());
        for _ in 0..len - 1 {
            assert!(chord.get_next_moment().is_some());
        }
        for _ in 0..5 {
            assert!(chord.get_next_moment().is_none());
        }
    }

    #[test]
    fn rests_have_one_silent_moment() {
        let rest = MidiRest::new(placement(300));
        assert!(rest.moment().rest_start);
        assert!(rest.get_first_moment().is_none());
        assert!(rest.get_next_moment().is_none());
    }
}
