use crossbeam::channel::{Receiver, Sender};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::assistant::{Assistant, AssistantOptions, PerformanceEvent, PerformanceState};
use crate::device::{SharedDevice, ThreadedTransport, Transport, TransportEvent, all_notes_off};
use crate::error::Error;
use crate::score::{PerformanceMode, ScoreDef};
use crate::timing::{Sequence, SpanEnd, SystemClock};

/// Output-only playback runs as a single subsequence under this index.
const OUTPUT_ONLY_INDEX: usize = 0;

#[derive(Debug, Clone)]
pub enum EngineCommand {
    LoadScore(PathBuf),
    SetScore(ScoreDef),
    Play { from_ms: u32, to: SpanEnd },
    /// Raw bytes from the live performer's input port.
    MidiIn(Vec<u8>),
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    ScoreLoaded { score: ScoreDef },
    PlaybackState { state: PerformanceState },
    MsPosition(u32),
    EndOfPerformance,
    Error { message: String },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
}

pub fn spawn_engine(device: SharedDevice) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    std::thread::spawn(move || {
        engine_thread(device, command_rx, update_tx);
    });

    EngineHandle {
        command_tx,
        update_rx,
    }
}

enum Performance {
    None,
    OutputOnly {
        sequence: Sequence,
        transport: ThreadedTransport,
        state: PerformanceState,
        /// Set when the span being played stops short of the end barline, so
        /// notes may still be sounding when it ends.
        cut_short: bool,
    },
    Assisted(Box<Assistant<ThreadedTransport, SystemClock>>),
}

struct EngineState {
    device: SharedDevice,
    performance: Performance,
    transport_tx: Sender<TransportEvent>,
    performance_tx: Sender<PerformanceEvent>,
    update_tx: Sender<EngineUpdate>,
    reported_state: PerformanceState,
}

fn engine_thread(
    device: SharedDevice,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    let (transport_tx, transport_rx) = crossbeam::channel::unbounded();
    let (performance_tx, performance_rx) = crossbeam::channel::unbounded();

    let mut state = EngineState {
        device,
        performance: Performance::None,
        transport_tx,
        performance_tx,
        update_tx,
        reported_state: PerformanceState::Stopped,
    };

    loop {
        crossbeam::select! {
            recv(command_rx) -> command => match command {
                Ok(command) => {
                    if let Err(e) = state.handle_command(command) {
                        error!(error = %e, "engine command failed");
                        state.send(EngineUpdate::Error {
                            message: e.to_string(),
                        });
                    }
                }
                Err(crossbeam::channel::RecvError) => break,
            },
            recv(transport_rx) -> event => {
                if let Ok(event) = event {
                    state.handle_transport_event(event);
                }
            },
            recv(performance_rx) -> event => {
                if let Ok(PerformanceEvent::EndOfPerformance) = event {
                    state.send(EngineUpdate::EndOfPerformance);
                }
            },
        }
        state.report_state();
    }

    state.stop_playback();
}

impl EngineState {
    fn send(&self, update: EngineUpdate) {
        let _ = self.update_tx.send(update);
    }

    fn playback_state(&self) -> PerformanceState {
        match &self.performance {
            Performance::None => PerformanceState::Stopped,
            Performance::OutputOnly { state, .. } => *state,
            Performance::Assisted(assistant) => assistant.state(),
        }
    }

    fn report_state(&mut self) {
        let state = self.playback_state();
        if state != self.reported_state {
            self.reported_state = state;
            self.send(EngineUpdate::PlaybackState { state });
        }
    }

    fn handle_command(&mut self, command: EngineCommand) -> Result<(), Error> {
        match command {
            EngineCommand::LoadScore(path) => {
                let score = ScoreDef::load(&path)?;
                self.set_score(score)
            }
            EngineCommand::SetScore(score) => self.set_score(score),
            EngineCommand::Play { from_ms, to } => self.play(from_ms, to),
            EngineCommand::MidiIn(bytes) => {
                if let Performance::Assisted(assistant) = &mut self.performance {
                    assistant.handle_midi_in(&bytes)?;
                }
                Ok(())
            }
            EngineCommand::Pause => self.pause(),
            EngineCommand::Resume => self.resume(),
            EngineCommand::Stop => self.stop(),
        }
    }

    fn set_score(&mut self, score: ScoreDef) -> Result<(), Error> {
        self.stop_playback();

        let sequence = score.build_sequence()?;
        self.performance = match score.performance.mode {
            PerformanceMode::OutputOnly => Performance::OutputOnly {
                sequence,
                transport: ThreadedTransport::new(self.device.clone(), self.transport_tx.clone()),
                state: PerformanceState::Stopped,
                cut_short: false,
            },
            PerformanceMode::Assisted {
                live_performer_track,
                ..
            } => {
                let assistant = Assistant::new(
                    sequence,
                    AssistantOptions {
                        live_performer_track,
                        uses_absolute_durations: score.performance.uses_absolute_durations,
                    },
                    ThreadedTransport::new(self.device.clone(), self.transport_tx.clone()),
                    SystemClock::new(),
                    self.performance_tx.clone(),
                )?;
                Performance::Assisted(Box::new(assistant))
            }
        };

        info!(name = %score.name, "score ready");
        self.send(EngineUpdate::ScoreLoaded { score });
        Ok(())
    }

    fn play(&mut self, from_ms: u32, to: SpanEnd) -> Result<(), Error> {
        match &mut self.performance {
            Performance::None => warn!("play requested without a score"),
            Performance::OutputOnly {
                sequence,
                transport,
                state,
                cut_short,
            } => {
                let span = sequence.span(from_ms, to);
                *cut_short = span.ms_position + span.total_ms_duration() < sequence.end_ms();
                transport.play(OUTPUT_ONLY_INDEX, &span);
                *state = PerformanceState::Running;
            }
            Performance::Assisted(assistant) => assistant.play_span(from_ms, to)?,
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), Error> {
        match &mut self.performance {
            Performance::None => {}
            Performance::OutputOnly {
                transport, state, ..
            } => {
                if *state == PerformanceState::Running {
                    transport.pause(OUTPUT_ONLY_INDEX);
                    *state = PerformanceState::Paused;
                }
            }
            Performance::Assisted(assistant) => assistant.pause()?,
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), Error> {
        match &mut self.performance {
            Performance::None => {}
            Performance::OutputOnly {
                transport, state, ..
            } => {
                if *state == PerformanceState::Paused {
                    transport.resume(OUTPUT_ONLY_INDEX);
                    *state = PerformanceState::Running;
                }
            }
            Performance::Assisted(assistant) => assistant.resume()?,
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        let result = match &mut self.performance {
            Performance::None => Ok(()),
            Performance::OutputOnly {
                transport, state, ..
            } => {
                transport.stop(OUTPUT_ONLY_INDEX);
                *state = PerformanceState::Stopped;
                Ok(())
            }
            Performance::Assisted(assistant) => assistant.stop(),
        };
        self.silence();
        result.map_err(Error::from)
    }

    /// Stops whatever is playing, ignoring state errors.
    fn stop_playback(&mut self) {
        if self.playback_state() != PerformanceState::Stopped {
            let _ = self.stop();
        }
    }

    fn silence(&self) {
        let mut device = self.device.lock();
        if let Err(e) = all_notes_off(device.as_mut(), 0.0) {
            warn!(error = %e, "could not silence output");
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::MsPosition(ms) => self.send(EngineUpdate::MsPosition(ms)),
            TransportEvent::SubsequenceEnded { index } => match &mut self.performance {
                Performance::Assisted(assistant) => assistant.report_end_of_subsequence(index),
                Performance::OutputOnly {
                    state, cut_short, ..
                } if index == OUTPUT_ONLY_INDEX => {
                    *state = PerformanceState::Stopped;
                    let cut_short = *cut_short;
                    if cut_short {
                        self.silence();
                    }
                    info!("end of performance");
                    self.send(EngineUpdate::EndOfPerformance);
                }
                _ => {}
            },
        }
    }
}
