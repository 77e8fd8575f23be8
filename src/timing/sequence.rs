use tracing::debug;

use super::Track;
use crate::chord::{MidiChord, MidiObject, Moment};
use crate::error::SequencingError;

/// Where a span of playback stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanEnd {
    At(u32),
    EndOfScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsequenceKind {
    /// Starts with one of the live performer's chords and waits for their
    /// note-on.
    Performer,
    /// Played automatically: the live performer is resting.
    Assistant,
    /// The zero-length subsequence at the end of the score. Holds the
    /// moments at the barline, which are only sent on their own when the
    /// performer's last chord is cut short.
    EndBarline,
}

/// A contiguous slice of every track, played as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Subsequence {
    pub kind: SubsequenceKind,
    pub ms_position: u32,
    ms_duration: u32,
    tracks: Vec<Track>,
    speed: f64,
}

impl Subsequence {
    fn new(kind: SubsequenceKind, ms_position: u32, ms_duration: u32, tracks: Vec<Track>) -> Self {
        Self {
            kind,
            ms_position,
            ms_duration,
            tracks,
            speed: 1.0,
        }
    }

    pub fn is_performer(&self) -> bool {
        self.kind == SubsequenceKind::Performer
    }

    pub fn is_rest(&self) -> bool {
        self.kind == SubsequenceKind::Assistant
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Duration in the score, unaffected by speed changes.
    pub fn total_ms_duration(&self) -> u32 {
        self.ms_duration
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Multiplies every duration in the subsequence by `factor` when it is
    /// next played. The moments themselves are untouched.
    pub fn change_speed(&mut self, factor: f64) {
        self.speed = factor;
    }

    /// Duration at the current speed.
    pub fn ms_duration(&self) -> f64 {
        f64::from(self.ms_duration) * self.speed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    tracks: Vec<Track>,
    end_ms: u32,
}

impl Sequence {
    pub fn new(tracks: Vec<Track>, end_ms: u32) -> Self {
        Self { tracks, end_ms }
    }

    /// Assembles one track per voice. The sequence ends where the longest
    /// voice ends.
    pub fn from_voices(
        voices: impl IntoIterator<Item = (u8, Vec<MidiObject>)>,
    ) -> Result<Self, SequencingError> {
        let mut tracks = Vec::new();
        let mut end_ms = 0;
        for (channel, objects) in voices {
            let (track, voice_end) = assemble_track(channel, objects)?;
            end_ms = end_ms.max(voice_end);
            tracks.push(track);
        }
        Ok(Self { tracks, end_ms })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// The position of the end barline.
    pub fn end_ms(&self) -> u32 {
        self.end_ms
    }

    fn slice_tracks(&self, from: u32, to: Option<u32>) -> Vec<Track> {
        self.tracks
            .iter()
            .map(|track| Track::from_moments(track.channel, track.slice(from, to).to_vec()))
            .collect()
    }

    /// Every track from `from` up to (not including) `to`, as one automatic
    /// subsequence. A span reaching the end barline also takes the moments
    /// at the barline, so the last chord-offs are sent.
    pub fn span(&self, from: u32, to: SpanEnd) -> Subsequence {
        let to = match to {
            SpanEnd::At(to) => to.min(self.end_ms),
            SpanEnd::EndOfScore => self.end_ms,
        };
        let from = from.min(to);
        Subsequence::new(
            SubsequenceKind::Assistant,
            from,
            to - from,
            self.slice_tracks(from, self.slice_end(to)),
        )
    }

    fn slice_end(&self, to: u32) -> Option<u32> {
        (to < self.end_ms).then_some(to)
    }

    /// Splits the sequence around the live performer's track.
    ///
    /// Each of the performer's chords starts a performer subsequence. A rest
    /// starts an assistant subsequence unless the previous subsequence is
    /// already one. The last subsequence is always an empty one at the end
    /// barline. Its moments are also played by the subsequence before it.
    pub fn subsequences(
        &self,
        live_performer_track: usize,
    ) -> Result<Vec<Subsequence>, SequencingError> {
        let performer = self
            .tracks
            .get(live_performer_track)
            .ok_or(SequencingError::NoSuchTrack {
                index: live_performer_track,
                len: self.tracks.len(),
            })?;

        let mut boundaries: Vec<(u32, SubsequenceKind)> = Vec::new();
        for moment in performer.moments() {
            if moment.ms_position >= self.end_ms {
                break;
            }
            let kind = if moment.chord_start {
                SubsequenceKind::Performer
            } else if moment.rest_start {
                SubsequenceKind::Assistant
            } else {
                continue;
            };
            match boundaries.last() {
                Some(&(_, SubsequenceKind::Assistant)) if kind == SubsequenceKind::Assistant => {}
                _ => boundaries.push((moment.ms_position, kind)),
            }
        }

        // the other tracks may start before the performer does
        if boundaries.first().is_none_or(|&(ms, _)| ms > 0) {
            boundaries.insert(0, (0, SubsequenceKind::Assistant));
        }

        let mut subsequences = Vec::with_capacity(boundaries.len() + 1);
        for (i, &(start, kind)) in boundaries.iter().enumerate() {
            let end = boundaries.get(i + 1).map_or(self.end_ms, |&(next, _)| next);
            subsequences.push(Subsequence::new(
                kind,
                start,
                end - start,
                self.slice_tracks(start, self.slice_end(end)),
            ));
        }

        subsequences.push(Subsequence::new(
            SubsequenceKind::EndBarline,
            self.end_ms,
            0,
            self.slice_tracks(self.end_ms, None),
        ));

        debug!(
            count = subsequences.len(),
            live_performer_track, "partitioned sequence"
        );
        Ok(subsequences)
    }
}

/// Lays a voice's chords and rests end to end in one track.
///
/// Each chord's final chord-off is sent with the first moment of the object
/// after it; the last chord's goes at the end of the voice. Returns the track
/// and the voice's end position.
pub fn assemble_track(
    channel: u8,
    mut objects: Vec<MidiObject>,
) -> Result<(Track, u32), SequencingError> {
    for i in 1..objects.len() {
        let chord_off = match objects[i - 1].final_chord_off_moment() {
            Some(moment) if !moment.is_empty() => moment.messages.clone(),
            _ => continue,
        };
        objects[i].first_moment_mut().prepend(&chord_off);
    }

    let mut track = Track::new(channel);
    for object in &mut objects {
        let ms_position = object.ms_position_in_score();
        match object {
            MidiObject::Chord(chord) => append_chord(&mut track, chord)?,
            MidiObject::Rest(rest) => {
                track.append(rest.moment().at(ms_position), Some(ms_position))?
            }
        }
    }

    let end_ms = objects
        .last()
        .map_or(0, |object| object.ms_position_in_score() + object.ms_duration_in_score());
    if let Some(chord_off) = objects.last().and_then(MidiObject::final_chord_off_moment) {
        if !chord_off.is_empty() {
            track.append(chord_off.at(end_ms), None)?;
        }
    }

    Ok((track, end_ms))
}

fn append_chord(track: &mut Track, chord: &mut MidiChord) -> Result<(), SequencingError> {
    let start = chord.ms_position_in_score;
    let duration = chord.ms_duration_in_score;

    // always sent, even when empty, so the chord boundary is kept
    let first: Moment = match chord.moments().first() {
        Some(moment) => moment.at(start),
        None => return Ok(()),
    };
    track.append(first, Some(start))?;

    chord.get_first_moment();
    while let Some(placed) = chord.get_next_moment() {
        let position = placed.ms_position_in_chord;
        if position > duration || (placed.index == 0 && position >= duration) {
            break;
        }
        let mut moment = placed.moment.at(start + position);
        if placed.index == 0 {
            // a repeat pass is still the same chord
            moment.chord_start = false;
            moment.rest_start = false;
            moment.ms_position_in_score = None;
        }
        track.append(moment, None)?;
    }
    Ok(())
}
