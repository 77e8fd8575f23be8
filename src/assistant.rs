//! Drives an assisted performance from the live performer's MIDI input.
//!
//! The score is split into [`Subsequence`]s around the live performer's
//! track. A note-on starts the performer's next chord (or the rests in front
//! of it), a note-off of the same key plays the rests that follow. Everything
//! is played through a [`Transport`]; the assistant itself never blocks.

use std::fmt;

use crossbeam::channel::Sender;
use tracing::{debug, info, warn};

use crate::device::Transport;
use crate::error::{AssistantError, SequencingError};
use crate::events::{Message, command, control};
use crate::timing::{Clock, Sequence, SpanEnd, Subsequence, SubsequenceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceState {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for PerformanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PerformanceState::Stopped => "stopped",
            PerformanceState::Running => "running",
            PerformanceState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// How an input message was understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Unknown,
    IllegalIndex,
    EndOfSequence,
    Aftertouch,
    ModulationWheel,
    PitchWheel,
    NoteOn,
    NoteOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceEvent {
    EndOfPerformance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantOptions {
    pub live_performer_track: usize,
    /// When false, each subsequence the assistant plays is stretched to the
    /// pace the live performer just set.
    pub uses_absolute_durations: bool,
}

/// Indices into the subsequences of the span being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start_index: usize,
    /// The first subsequence not to be played.
    end_index: usize,
    /// The subsequence playing now, if any has been started.
    current_index: Option<usize>,
    /// The subsequence the next note-on plays.
    next_index: usize,
}

pub struct Assistant<T: Transport, C: Clock> {
    sequence: Sequence,
    options: AssistantOptions,
    subsequences: Vec<Subsequence>,
    transport: T,
    clock: C,
    events: Sender<PerformanceEvent>,
    state: PerformanceState,
    span: Option<Span>,
    live_key: Option<u8>,
    subsequence_start_ms: Option<f64>,
    paused_at_ms: f64,
}

impl<T: Transport, C: Clock> Assistant<T, C> {
    pub fn new(
        sequence: Sequence,
        options: AssistantOptions,
        transport: T,
        clock: C,
        events: Sender<PerformanceEvent>,
    ) -> Result<Self, SequencingError> {
        let subsequences = sequence.subsequences(options.live_performer_track)?;
        Ok(Self {
            sequence,
            options,
            subsequences,
            transport,
            clock,
            events,
            state: PerformanceState::Stopped,
            span: None,
            live_key: None,
            subsequence_start_ms: None,
            paused_at_ms: 0.0,
        })
    }

    pub fn state(&self) -> PerformanceState {
        self.state
    }

    pub fn subsequences(&self) -> &[Subsequence] {
        &self.subsequences
    }

    pub fn start_index(&self) -> Option<usize> {
        self.span.map(|span| span.start_index)
    }

    pub fn end_index(&self) -> Option<usize> {
        self.span.map(|span| span.end_index)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.span.and_then(|span| span.current_index)
    }

    pub fn next_index(&self) -> Option<usize> {
        self.span.map(|span| span.next_index)
    }

    /// The key the live performer is holding down, if any.
    pub fn live_key(&self) -> Option<u8> {
        self.live_key
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn index_at(&self, ms_position: u32) -> usize {
        self.subsequences
            .iter()
            .position(|s| s.ms_position >= ms_position)
            .unwrap_or(self.subsequences.len())
    }

    /// Starts a performance of the subsequences from `from_ms` up to `to`.
    /// Nothing is played until the live performer's first note-on.
    pub fn play_span(&mut self, from_ms: u32, to: SpanEnd) -> Result<(), AssistantError> {
        if self.state != PerformanceState::Stopped {
            return Err(AssistantError::InvalidState {
                operation: "play",
                state: self.state,
            });
        }

        let start_index = self.index_at(from_ms);
        let end_index = match to {
            SpanEnd::At(to_ms) => self.index_at(to_ms),
            SpanEnd::EndOfScore => self.subsequences.len().saturating_sub(1),
        };
        self.span = Some(Span {
            start_index,
            end_index,
            current_index: None,
            next_index: start_index,
        });
        self.live_key = None;
        self.subsequence_start_ms = None;
        self.state = PerformanceState::Running;
        info!(start_index, end_index, "assisted performance running");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), AssistantError> {
        if self.state != PerformanceState::Running {
            return Err(AssistantError::InvalidState {
                operation: "pause",
                state: self.state,
            });
        }

        self.paused_at_ms = self.clock.now_ms();
        if let Some(current) = self.current_index() {
            self.transport.pause(current);
        }
        self.state = PerformanceState::Paused;
        info!("assisted performance paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), AssistantError> {
        if self.state != PerformanceState::Paused {
            return Err(AssistantError::InvalidState {
                operation: "resume",
                state: self.state,
            });
        }

        if !self.options.uses_absolute_durations {
            let paused_for = self.clock.now_ms() - self.paused_at_ms;
            if let Some(start) = self.subsequence_start_ms.as_mut() {
                *start += paused_for;
            }
        }
        if let Some(current) = self.current_index() {
            self.transport.resume(current);
        }
        self.state = PerformanceState::Running;
        info!("assisted performance resumed");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), AssistantError> {
        if self.state == PerformanceState::Stopped {
            return Err(AssistantError::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }

        if let Some(current) = self.current_index() {
            self.transport.stop(current);
        }
        self.state = PerformanceState::Stopped;
        self.span = None;
        self.live_key = None;
        self.subsequence_start_ms = None;
        self.paused_at_ms = 0.0;

        if !self.options.uses_absolute_durations {
            // speeds were changed during the performance
            self.subsequences = self.sequence.subsequences(self.options.live_performer_track)?;
        }

        info!("assisted performance stopped");
        self.report_end_of_performance();
        Ok(())
    }

    /// Called when the transport reports that subsequence `index` played to
    /// its end. Reports for anything but the current subsequence are stale:
    /// the performer has already moved on.
    pub fn report_end_of_subsequence(&mut self, index: usize) {
        if self.current_index() == Some(index) {
            self.live_key = None;
        } else {
            debug!(index, current = ?self.current_index(), "stale end of subsequence");
        }
    }

    fn report_end_of_performance(&self) {
        info!("end of performance");
        let _ = self.events.send(PerformanceEvent::EndOfPerformance);
    }

    pub fn classify(&self, message: Option<Message>) -> InputKind {
        let kind = match message.map(|m| (m.command(), m.data1())) {
            Some((command::AFTERTOUCH, _)) => InputKind::Aftertouch,
            Some((command::CONTROL_CHANGE, control::MODULATION_WHEEL)) => {
                InputKind::ModulationWheel
            }
            Some((command::PITCH_WHEEL, _)) => InputKind::PitchWheel,
            Some((command::NOTE_ON, _)) => InputKind::NoteOn,
            Some((command::NOTE_OFF, _)) => InputKind::NoteOff,
            _ => InputKind::Unknown,
        };
        if kind != InputKind::Unknown {
            return kind;
        }

        let next = self.next_index();
        if next == self.end_index() {
            InputKind::EndOfSequence
        } else if next.is_none_or(|index| index >= self.subsequences.len()) {
            InputKind::IllegalIndex
        } else {
            InputKind::Unknown
        }
    }

    /// Handles one message from the live performer's input device.
    pub fn handle_midi_in(&mut self, bytes: &[u8]) -> Result<InputKind, AssistantError> {
        let message = Message::from_bytes(bytes);
        let kind = self.classify(message);
        debug!(?kind, ?bytes, "live input");

        match (kind, message) {
            (InputKind::Unknown, _) => debug!(?bytes, "unknown message type"),
            (InputKind::Aftertouch, Some(m)) => warn!(value = m.data2(), "aftertouch ignored"),
            (InputKind::ModulationWheel, Some(m)) => {
                warn!(value = m.data2(), "modulation wheel ignored")
            }
            (InputKind::PitchWheel, Some(m)) => warn!(value = m.data2(), "pitch wheel ignored"),
            (InputKind::IllegalIndex, _) => {
                return Err(AssistantError::IllegalIndex {
                    index: self.next_index(),
                    len: self.subsequences.len(),
                });
            }
            (InputKind::EndOfSequence, _) => self.stop()?,
            (InputKind::NoteOn, Some(m)) => self.handle_note_on(m.data1(), m.data2())?,
            (InputKind::NoteOff, Some(m)) => self.handle_note_off(m.data1())?,
            _ => {}
        }
        Ok(kind)
    }

    fn running_span(&self) -> Result<Span, AssistantError> {
        self.span.ok_or(AssistantError::IllegalIndex {
            index: None,
            len: self.subsequences.len(),
        })
    }

    fn handle_note_on(&mut self, pitch: u8, velocity: u8) -> Result<(), AssistantError> {
        let span = self.running_span()?;
        debug!(pitch, velocity, "note on");
        self.live_key = Some(pitch);

        if velocity == 0 {
            return self.handle_note_off(pitch);
        }

        self.stop_current();

        let next = span.next_index;
        let kind = self
            .subsequences
            .get(next)
            .map(|s| s.kind)
            .ok_or(AssistantError::IllegalIndex {
                index: Some(next),
                len: self.subsequences.len(),
            })?;

        if next == span.start_index || kind == SubsequenceKind::Performer {
            self.play_next()
        } else if kind == SubsequenceKind::Assistant {
            self.play_rests()
        } else {
            Err(AssistantError::SubsequenceType { index: next })
        }
    }

    fn handle_note_off(&mut self, pitch: u8) -> Result<(), AssistantError> {
        debug!(pitch, "note off");
        if self.live_key != Some(pitch) {
            return Ok(());
        }

        self.stop_current();
        self.play_rests()?;

        let span = self.running_span()?;
        if span.next_index + 1 == self.subsequences.len() {
            self.play_end_barline(span);
            self.report_end_of_performance();
        }
        Ok(())
    }

    /// Sends the moments at the end barline, unless the subsequence still
    /// playing will reach them itself.
    fn play_end_barline(&mut self, span: Span) {
        if span
            .current_index
            .is_some_and(|current| self.transport.is_playing(current))
        {
            return;
        }
        let index = span.next_index;
        if let Some(barline) = self.subsequences.get(index) {
            if barline.tracks().iter().any(|track| !track.is_empty()) {
                debug!(index, "end barline");
                self.transport.play(index, barline);
            }
        }
    }

    fn stop_current(&mut self) {
        if let Some(current) = self.current_index() {
            if self.transport.is_playing(current) {
                self.transport.stop(current);
            }
        }
    }

    /// Plays consecutive rest subsequences until a performer subsequence or
    /// the end barline is next.
    fn play_rests(&mut self) -> Result<(), AssistantError> {
        loop {
            let span = self.running_span()?;
            let next = span.next_index;
            if next + 1 >= self.subsequences.len() || !self.subsequences[next].is_rest() {
                return Ok(());
            }
            self.play_next()?;
        }
    }

    /// Plays the subsequence at `next_index` and advances.
    fn play_next(&mut self) -> Result<(), AssistantError> {
        let mut span = self.running_span()?;
        let next = span.next_index;
        let len = self.subsequences.len();

        if !self.options.uses_absolute_durations {
            let now = self.clock.now_ms();
            if let (Some(current), Some(started)) = (span.current_index, self.subsequence_start_ms) {
                let nominal = self.subsequences.get(current).map_or(0, Subsequence::total_ms_duration);
                if nominal > 0 {
                    let speed = (now - started) / f64::from(nominal);
                    if let Some(subsequence) = self.subsequences.get_mut(next) {
                        subsequence.change_speed(speed);
                    }
                }
            }
            self.subsequence_start_ms = Some(now);
        }

        let subsequence = self.subsequences.get(next).ok_or(AssistantError::IllegalIndex {
            index: Some(next),
            len,
        })?;
        debug!(index = next, kind = ?subsequence.kind, speed = subsequence.speed(), "play subsequence");
        self.transport.play(next, subsequence);

        span.current_index = Some(next);
        span.next_index = next + 1;
        self.span = Some(span);
        Ok(())
    }
}
