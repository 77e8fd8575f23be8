use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::chord::{
    ChordDef, DEFAULT_SLIDER_PERIOD_MS, MidiChord, MidiObject, MidiRest, ScorePlacement,
};
use crate::error::{DefinitionError, Error};
use crate::events::MAX_MIDI_CHANNELS;
use crate::timing::Sequence;

fn default_slider_period_ms() -> u32 {
    DEFAULT_SLIDER_PERIOD_MS
}

fn default_speed() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PerformanceMode {
    /// Everything is played automatically.
    #[default]
    OutputOnly,
    /// The voice at `live_performer_track` is played live. With `silent`, its
    /// chords send nothing and only mark where the performer comes in.
    Assisted {
        live_performer_track: usize,
        #[serde(default)]
        silent: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerformanceConfig {
    #[serde(default)]
    pub mode: PerformanceMode,
    #[serde(default = "default_slider_period_ms")]
    pub slider_period_ms: u32,
    /// Global speed factor: 2.0 plays everything twice as fast.
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// When false the assistant follows the performer's pace.
    #[serde(default = "default_true")]
    pub uses_absolute_durations: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            mode: PerformanceMode::OutputOnly,
            slider_period_ms: DEFAULT_SLIDER_PERIOD_MS,
            speed: 1.0,
            uses_absolute_durations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VoiceObject {
    /// `ms_duration` is how long the chord lasts in the score. Without it
    /// the chord lasts as long as its basic chords; a longer one is filled by
    /// repeating them.
    Chord {
        def: ChordDef,
        #[serde(default)]
        ms_duration: Option<u32>,
    },
    Rest { ms_duration: u32 },
}

impl VoiceObject {
    /// A chord lasting as long as its basic chords.
    pub fn chord(def: ChordDef) -> Self {
        VoiceObject::Chord {
            def,
            ms_duration: None,
        }
    }

    pub fn ms_duration(&self) -> Result<u32, DefinitionError> {
        match self {
            VoiceObject::Chord {
                ms_duration: Some(ms_duration),
                ..
            } => Ok(*ms_duration),
            VoiceObject::Chord { def, .. } => def.ms_duration(),
            VoiceObject::Rest { ms_duration } => Ok(*ms_duration),
        }
    }
}

/// One output channel's chords and rests, played end to end from 0ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceDef {
    pub channel: u8,
    pub objects: Vec<VoiceObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreDef {
    pub name: String,
    pub voices: Vec<VoiceDef>,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl ScoreDef {
    pub fn from_ron(source: &str) -> Result<Self, DefinitionError> {
        let score: ScoreDef = ron::from_str(source)?;
        score.validate()?;
        Ok(score)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let source = fs::read_to_string(path)?;
        let score = Self::from_ron(&source)?;
        info!(name = %score.name, voices = score.voices.len(), "score loaded");
        Ok(score)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        let performance = &self.performance;
        if !performance.speed.is_finite() || performance.speed <= 0.0 {
            return Err(DefinitionError::InvalidSpeed(performance.speed));
        }
        if performance.slider_period_ms == 0 {
            return Err(DefinitionError::InvalidSliderPeriod);
        }
        let mut ids = HashSet::new();
        for voice in &self.voices {
            if voice.channel >= MAX_MIDI_CHANNELS {
                return Err(DefinitionError::InvalidChannel(voice.channel));
            }
            let mut voice_end: u32 = 0;
            for object in &voice.objects {
                if let VoiceObject::Chord { def, ms_duration } = object {
                    def.validate()?;
                    let id = &def.attributes.id;
                    if *ms_duration == Some(0) {
                        return Err(DefinitionError::ZeroDuration { id: id.clone() });
                    }
                    if !ids.insert(id.as_str()) {
                        return Err(DefinitionError::DuplicateId(id.clone()));
                    }
                }
                voice_end = voice_end.checked_add(object.ms_duration()?).ok_or(
                    DefinitionError::VoiceDurationOverflow {
                        channel: voice.channel,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// A copy of the score played `speed` times as fast.
    ///
    /// Object boundaries are rounded from their cumulative positions, so
    /// voices stay aligned. Basic chords are corrected to add up to their
    /// chord's new duration, but never shrink below the chord's
    /// `min_basic_chord_ms_duration`. Every chord gets an explicit score
    /// duration, so basic chords that could not shrink far enough don't move
    /// the objects after them.
    pub fn at_speed(&self, speed: f64) -> Result<ScoreDef, DefinitionError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(DefinitionError::InvalidSpeed(speed));
        }

        let mut score = self.clone();
        score.performance.speed = 1.0;
        for voice in &mut score.voices {
            let channel = voice.channel;
            let mut old_position: u32 = 0;
            let mut new_position = 0;
            for object in &mut voice.objects {
                let old_end = old_position
                    .checked_add(object.ms_duration()?)
                    .ok_or(DefinitionError::VoiceDurationOverflow { channel })?;
                let new_end = scale(old_end, speed);
                let target = new_end.saturating_sub(new_position);
                match object {
                    VoiceObject::Rest { ms_duration } => *ms_duration = target,
                    VoiceObject::Chord { def, ms_duration } => {
                        let basic_chords_target = match ms_duration {
                            Some(_) => scale(def.ms_duration()?, speed),
                            None => target,
                        };
                        rescale_basic_chords(def, speed, basic_chords_target);
                        *ms_duration = Some(target);
                    }
                }
                old_position = old_end;
                new_position = new_end;
            }
        }
        Ok(score)
    }

    fn silent_track(&self) -> Option<usize> {
        match self.performance.mode {
            PerformanceMode::Assisted {
                live_performer_track,
                silent: true,
            } => Some(live_performer_track),
            _ => None,
        }
    }

    /// Builds every voice into a track, applying the global speed first.
    pub fn build_sequence(&self) -> Result<Sequence, Error> {
        self.validate()?;
        let score = if self.performance.speed == 1.0 {
            self.clone()
        } else {
            self.at_speed(self.performance.speed)?
        };

        let silent_track = self.silent_track();
        let mut voices = Vec::with_capacity(score.voices.len());
        for (index, voice) in score.voices.iter().enumerate() {
            let mut objects = Vec::with_capacity(voice.objects.len());
            let mut ms_position: u32 = 0;
            for object in &voice.objects {
                let ms_duration = object.ms_duration()?;
                let placement = ScorePlacement {
                    ms_position,
                    ms_duration,
                };
                objects.push(match object {
                    VoiceObject::Chord { .. } if silent_track == Some(index) => {
                        MidiObject::Chord(MidiChord::silent(placement))
                    }
                    VoiceObject::Chord { def, .. } => MidiObject::Chord(MidiChord::new(
                        voice.channel,
                        def,
                        placement,
                        self.performance.slider_period_ms,
                    )?),
                    VoiceObject::Rest { .. } => MidiObject::Rest(MidiRest::new(placement)),
                });
                ms_position = ms_position.checked_add(ms_duration).ok_or(
                    DefinitionError::VoiceDurationOverflow {
                        channel: voice.channel,
                    },
                )?;
            }
            voices.push((voice.channel, objects));
        }

        let sequence = Sequence::from_voices(voices)?;
        info!(
            name = %self.name,
            tracks = sequence.tracks().len(),
            end_ms = sequence.end_ms(),
            "sequence built"
        );
        Ok(sequence)
    }
}

fn scale(ms: u32, speed: f64) -> u32 {
    (f64::from(ms) / speed).round() as u32
}

fn rescale_basic_chords(def: &mut ChordDef, speed: f64, target: u32) {
    let min = def.attributes.min_basic_chord_ms_duration.unwrap_or(1);
    for bc in &mut def.basic_chords {
        bc.ms_duration = scale(bc.ms_duration, speed);
    }

    let mut total = def
        .basic_chords
        .iter()
        .fold(0u32, |total, bc| total.saturating_add(bc.ms_duration));
    while total > target {
        let mut reduced = false;
        for bc in def.basic_chords.iter_mut().rev() {
            if total == target {
                break;
            }
            if bc.ms_duration > min {
                bc.ms_duration -= 1;
                total -= 1;
                reduced = true;
            }
        }
        if !reduced {
            break;
        }
    }
    if total < target {
        if let Some(last) = def.basic_chords.last_mut() {
            last.ms_duration += target - total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::{BasicChordDef, ChordAttributes};
    use crate::events::Message;

    const SCORE: &str = r#"(
        name: "duet",
        voices: [
            (
                channel: 0,
                objects: [
                    Rest(ms_duration: 100),
                    Chord(def: (
                        attributes: (id: "p1"),
                        basic_chords: [(ms_duration: 100, notes: [60], velocities: [100])],
                    )),
                ],
            ),
            (
                channel: 1,
                objects: [
                    Chord(def: (
                        attributes: (id: "a1", repeat_moments: false),
                        basic_chords: [
                            (ms_duration: 50, notes: [48, 55], velocities: [80, 80]),
                            (ms_duration: 150, notes: [50], velocities: [70], bank: Some(1), patch: Some(4)),
                        ],
                    )),
                ],
            ),
        ],
        performance: (mode: Assisted(live_performer_track: 0, silent: true)),
    )"#;

    fn basic_chords(durations: &[u32]) -> Vec<BasicChordDef> {
        durations
            .iter()
            .map(|&ms| BasicChordDef::new(ms, vec![60], vec![100]))
            .collect()
    }

    fn chord(id: &str, durations: &[u32]) -> VoiceObject {
        VoiceObject::chord(ChordDef {
            attributes: ChordAttributes::new(id),
            basic_chords: basic_chords(durations),
            sliders: None,
        })
    }

    fn score(objects: Vec<VoiceObject>) -> ScoreDef {
        ScoreDef {
            name: "test".to_string(),
            voices: vec![VoiceDef {
                channel: 0,
                objects,
            }],
            performance: PerformanceConfig::default(),
        }
    }

    fn durations(object: &VoiceObject) -> Vec<u32> {
        match object {
            VoiceObject::Chord { def, .. } => {
                def.basic_chords.iter().map(|bc| bc.ms_duration).collect()
            }
            VoiceObject::Rest { ms_duration } => vec![*ms_duration],
        }
    }

    #[test]
    fn parses_with_performance_defaults() {
        let score = ScoreDef::from_ron(SCORE).unwrap();
        assert_eq!(score.voices.len(), 2);
        assert_eq!(score.performance.slider_period_ms, 10);
        assert_eq!(score.performance.speed, 1.0);
        assert!(score.performance.uses_absolute_durations);
        assert_eq!(
            score.performance.mode,
            PerformanceMode::Assisted {
                live_performer_track: 0,
                silent: true
            }
        );
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let mut score = score(vec![]);
        score.voices[0].channel = 16;
        assert!(matches!(score.validate(), Err(DefinitionError::InvalidChannel(16))));
    }

    #[test]
    fn at_speed_keeps_voices_aligned() {
        let score = score(vec![chord("c1", &[5, 5, 5]), VoiceObject::Rest { ms_duration: 5 }]);
        let faster = score.at_speed(2.0).unwrap();

        // 15ms -> 7.5 rounds to 8, so the basic chords lose a millisecond
        assert_eq!(durations(&faster.voices[0].objects[0]), vec![3, 3, 2]);
        // the rest ends at 20 / 2
        assert_eq!(durations(&faster.voices[0].objects[1]), vec![2]);
        assert_eq!(faster.performance.speed, 1.0);
    }

    #[test]
    fn basic_chords_stay_above_their_minimum() {
        let mut score = score(vec![
            chord("c1", &[3, 3, 3]),
            VoiceObject::Rest { ms_duration: 3 },
        ]);
        if let VoiceObject::Chord { def, .. } = &mut score.voices[0].objects[0] {
            def.attributes.min_basic_chord_ms_duration = Some(2);
        }
        // 1.5 rounds up to 2 for each, but 4.5 only rounds up once
        let faster = score.at_speed(2.0).unwrap();
        let objects = &faster.voices[0].objects;
        assert_eq!(durations(&objects[0]), vec![2, 2, 2]);

        // the chord still ends at 5, so the rest keeps its place
        assert_eq!(objects[0].ms_duration().unwrap(), 5);
        assert_eq!(durations(&objects[1]), vec![1]);
        assert_eq!(faster.build_sequence().unwrap().end_ms(), 6);
    }

    #[test]
    fn chords_repeat_to_fill_their_score_duration() {
        let score = ScoreDef::from_ron(
            r#"(
                name: "loop",
                voices: [(
                    channel: 0,
                    objects: [
                        Chord(
                            def: (
                                attributes: (id: "loop"),
                                basic_chords: [(ms_duration: 50, notes: [60], velocities: [100])],
                            ),
                            ms_duration: Some(150),
                        ),
                        Rest(ms_duration: 50),
                    ],
                )],
                performance: (mode: Assisted(live_performer_track: 0)),
            )"#,
        )
        .unwrap();
        let sequence = score.build_sequence().unwrap();
        assert_eq!(sequence.end_ms(), 200);

        let note_ons: Vec<u32> = sequence.tracks()[0]
            .moments()
            .iter()
            .filter(|m| m.messages.contains(&Message::note_on(0, 60, 100)))
            .map(|m| m.ms_position)
            .collect();
        assert_eq!(note_ons, vec![0, 50, 100]);
        // one performer chord, however often it repeats
        assert_eq!(sequence.subsequences(0).unwrap().len(), 3);
    }

    #[test]
    fn chord_ids_are_unique_within_a_score() {
        let score = score(vec![chord("x", &[10]), chord("x", &[10])]);
        assert!(matches!(
            score.validate(),
            Err(DefinitionError::DuplicateId(id)) if id == "x"
        ));
    }

    #[test]
    fn chords_cannot_last_no_time() {
        let mut score = score(vec![chord("c1", &[10])]);
        if let VoiceObject::Chord { ms_duration, .. } = &mut score.voices[0].objects[0] {
            *ms_duration = Some(0);
        }
        assert!(matches!(
            score.validate(),
            Err(DefinitionError::ZeroDuration { .. })
        ));
    }

    #[test]
    fn overlong_voices_are_rejected() {
        let score = score(vec![
            VoiceObject::Rest {
                ms_duration: u32::MAX,
            },
            VoiceObject::Rest { ms_duration: 1 },
        ]);
        assert!(matches!(
            score.validate(),
            Err(DefinitionError::VoiceDurationOverflow { channel: 0 })
        ));
    }

    #[test]
    fn speed_must_be_positive() {
        let score = score(vec![]);
        assert!(matches!(score.at_speed(0.0), Err(DefinitionError::InvalidSpeed(_))));
        assert!(matches!(score.at_speed(f64::NAN), Err(DefinitionError::InvalidSpeed(_))));
    }

    #[test]
    fn silent_performer_chords_send_nothing() {
        let score = ScoreDef::from_ron(SCORE).unwrap();
        let sequence = score.build_sequence().unwrap();
        assert_eq!(sequence.end_ms(), 200);

        let performer = sequence.tracks()[0].moments();
        assert_eq!(performer.len(), 2);
        assert!(performer[0].rest_start);
        assert!(performer[1].chord_start);
        assert!(performer.iter().all(|m| m.messages.is_empty()));

        let accompaniment = sequence.tracks()[1].moments();
        assert_eq!(accompaniment.first().map(|m| m.messages.len()), Some(2));
    }

    #[test]
    fn save_and_load_round_trip() {
        let score = ScoreDef::from_ron(SCORE).unwrap();
        let path = std::env::temp_dir()
            .join(format!("accompanist-{}", std::process::id()))
            .join("duet.ron");
        score.save(&path).unwrap();
        let loaded = ScoreDef::load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, score);
    }
}
