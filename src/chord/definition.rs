use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

fn default_true() -> bool {
    true
}

/// Attributes of a whole (ornamented) chord.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChordAttributes {
    pub id: String,
    #[serde(default)]
    pub volume: Option<u8>,
    /// Loop the chord's moments while its score duration lasts.
    #[serde(default = "default_true")]
    pub repeat_moments: bool,
    /// Send the deferred chord-off when the next score object starts.
    #[serde(default = "default_true")]
    pub has_chord_off: bool,
    #[serde(default)]
    pub pitch_wheel_deviation: Option<u8>,
    /// Lower bound used when basic chord durations are rescaled. Defaults to 1ms.
    #[serde(default)]
    pub min_basic_chord_ms_duration: Option<u32>,
}

impl ChordAttributes {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            volume: None,
            repeat_moments: true,
            has_chord_off: true,
            pitch_wheel_deviation: None,
            min_basic_chord_ms_duration: None,
        }
    }
}

/// One layer of simultaneous notes inside a chord.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicChordDef {
    pub ms_duration: u32,
    pub notes: Vec<u8>,
    pub velocities: Vec<u8>,
    #[serde(default)]
    pub bank: Option<u8>,
    /// Required when `bank` is set.
    #[serde(default)]
    pub patch: Option<u8>,
    #[serde(default = "default_true")]
    pub has_chord_off: bool,
}

impl BasicChordDef {
    pub fn new(ms_duration: u32, notes: Vec<u8>, velocities: Vec<u8>) -> Self {
        Self {
            ms_duration,
            notes,
            velocities,
            bank: None,
            patch: None,
            has_chord_off: true,
        }
    }
}

/// Continuous controller contours, each a list of 7-bit values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlidersDef {
    #[serde(default)]
    pub pitch_wheel: Option<Vec<u8>>,
    #[serde(default)]
    pub pan: Option<Vec<u8>>,
    #[serde(default)]
    pub modulation_wheel: Option<Vec<u8>>,
    #[serde(default)]
    pub expression_slider: Option<Vec<u8>>,
}

impl SlidersDef {
    pub fn is_empty(&self) -> bool {
        self.pitch_wheel.is_none()
            && self.pan.is_none()
            && self.modulation_wheel.is_none()
            && self.expression_slider.is_none()
    }

    pub(crate) fn contours(&self) -> [(&'static str, Option<&[u8]>); 4] {
        [
            ("pitch_wheel", self.pitch_wheel.as_deref()),
            ("pan", self.pan.as_deref()),
            ("modulation_wheel", self.modulation_wheel.as_deref()),
            ("expression_slider", self.expression_slider.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChordDef {
    pub attributes: ChordAttributes,
    pub basic_chords: Vec<BasicChordDef>,
    #[serde(default)]
    pub sliders: Option<SlidersDef>,
}

impl ChordDef {
    pub fn from_ron(source: &str) -> Result<Self, DefinitionError> {
        let def: ChordDef = ron::from_str(source)?;
        def.validate()?;
        Ok(def)
    }

    /// The chord's natural duration: the sum of its basic chords.
    pub fn ms_duration(&self) -> Result<u32, DefinitionError> {
        self.basic_chords
            .iter()
            .try_fold(0u32, |total, bc| total.checked_add(bc.ms_duration))
            .ok_or_else(|| DefinitionError::DurationOverflow {
                id: self.attributes.id.clone(),
            })
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        let id = &self.attributes.id;
        if id.is_empty() {
            return Err(DefinitionError::MissingId);
        }
        if self.basic_chords.is_empty() {
            return Err(DefinitionError::NoBasicChords { id: id.clone() });
        }

        let check = |field: &'static str, value: u8| {
            if value > 127 {
                Err(DefinitionError::ValueOutOfRange {
                    id: id.clone(),
                    field,
                    value: value.into(),
                })
            } else {
                Ok(())
            }
        };

        if let Some(volume) = self.attributes.volume {
            check("volume", volume)?;
        }
        if let Some(deviation) = self.attributes.pitch_wheel_deviation {
            check("pitch_wheel_deviation", deviation)?;
        }

        for (index, bc) in self.basic_chords.iter().enumerate() {
            if bc.notes.len() != bc.velocities.len() {
                return Err(DefinitionError::NoteVelocityMismatch {
                    id: id.clone(),
                    index,
                    notes: bc.notes.len(),
                    velocities: bc.velocities.len(),
                });
            }
            for &note in &bc.notes {
                check("notes", note)?;
            }
            for &velocity in &bc.velocities {
                check("velocities", velocity)?;
            }
            if let Some(bank) = bc.bank {
                check("bank", bank)?;
                if bc.patch.is_none() {
                    return Err(DefinitionError::BankWithoutPatch {
                        id: id.clone(),
                        index,
                    });
                }
            }
            if let Some(patch) = bc.patch {
                check("patch", patch)?;
            }
        }

        if let Some(sliders) = &self.sliders {
            for (slider, contour) in sliders.contours() {
                let Some(values) = contour else { continue };
                if values.is_empty() {
                    return Err(DefinitionError::EmptySlider {
                        id: id.clone(),
                        slider,
                    });
                }
                for &value in values {
                    check(slider, value)?;
                }
            }
        }

        self.ms_duration()?;

        if self.attributes.has_chord_off && self.basic_chords.iter().all(|bc| bc.notes.is_empty()) {
            return Err(DefinitionError::NoNoteOffs { id: id.clone() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaults() {
        let def = ChordDef::from_ron(
            r#"(
                attributes: (id: "c1", pitch_wheel_deviation: Some(4)),
                basic_chords: [(ms_duration: 200, notes: [60, 64], velocities: [100, 90])],
            )"#,
        )
        .unwrap();

        assert!(def.attributes.repeat_moments);
        assert!(def.attributes.has_chord_off);
        assert!(def.basic_chords[0].has_chord_off);
        assert_eq!(def.attributes.pitch_wheel_deviation, Some(4));
        assert_eq!(def.sliders, None);
        assert_eq!(def.ms_duration().unwrap(), 200);
    }

    #[test]
    fn overlong_basic_chords_are_rejected() {
        let err = ChordDef::from_ron(
            r#"(
                attributes: (id: "long"),
                basic_chords: [
                    (ms_duration: 4294967295, notes: [60], velocities: [100]),
                    (ms_duration: 1, notes: [62], velocities: [100]),
                ],
            )"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::DurationOverflow { id } if id == "long"));
    }

    #[test]
    fn unknown_attribute_is_a_parse_error() {
        let err = ChordDef::from_ron(
            r#"(
                attributes: (id: "c1", tempo: 3),
                basic_chords: [(ms_duration: 200, notes: [60], velocities: [100])],
            )"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn basic_chord_without_notes_is_rejected() {
        let err = ChordDef::from_ron(
            r#"(
                attributes: (id: "c1"),
                basic_chords: [(ms_duration: 200, velocities: [100])],
            )"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn mismatched_velocities_are_rejected() {
        let def = ChordDef {
            attributes: ChordAttributes::new("c1"),
            basic_chords: vec![BasicChordDef::new(100, vec![60, 62], vec![100])],
            sliders: None,
        };
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::NoteVelocityMismatch {
                index: 0,
                notes: 2,
                velocities: 1,
                ..
            })
        ));
    }

    #[test]
    fn bank_needs_patch_and_values_stay_seven_bit() {
        let mut bc = BasicChordDef::new(100, vec![60], vec![100]);
        bc.bank = Some(2);
        let mut def = ChordDef {
            attributes: ChordAttributes::new("c1"),
            basic_chords: vec![bc],
            sliders: None,
        };
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::BankWithoutPatch { index: 0, .. })
        ));

        def.basic_chords[0].patch = Some(5);
        def.basic_chords[0].notes = vec![130];
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::ValueOutOfRange { field: "notes", value: 130, .. })
        ));
    }

    #[test]
    fn chord_off_needs_at_least_one_note() {
        let mut def = ChordDef {
            attributes: ChordAttributes::new("c1"),
            basic_chords: vec![BasicChordDef::new(100, vec![], vec![])],
            sliders: None,
        };
        assert!(matches!(def.validate(), Err(DefinitionError::NoNoteOffs { .. })));

        def.attributes.has_chord_off = false;
        assert!(def.validate().is_ok());
    }
}
