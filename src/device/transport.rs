use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::SharedDevice;
use crate::timing::{Subsequence, schedule_subsequence};

/// Reported by a transport while it plays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    /// The subsequence played to its end without being stopped.
    SubsequenceEnded { index: usize },
    /// A chord or rest boundary was just sent.
    MsPosition(u32),
}

/// Plays subsequences, identified by their index in the performance.
pub trait Transport: Send {
    fn play(&mut self, index: usize, subsequence: &Subsequence);
    /// Nothing more from the subsequence is sent once this returns.
    fn stop(&mut self, index: usize);
    fn pause(&mut self, index: usize);
    fn resume(&mut self, index: usize);
    fn is_playing(&self, index: usize) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Playing,
    Paused(Instant),
    Stopped,
    Finished,
}

struct ControlState {
    status: Status,
    paused_for: Duration,
}

struct Control {
    state: Mutex<ControlState>,
    wake: Condvar,
}

struct Playback {
    control: Arc<Control>,
    handle: JoinHandle<()>,
}

/// Plays each subsequence on its own worker thread, sending its moments to
/// the shared device at their scheduled times.
pub struct ThreadedTransport {
    device: SharedDevice,
    events: Sender<TransportEvent>,
    playbacks: HashMap<usize, Playback>,
}

impl ThreadedTransport {
    pub fn new(device: SharedDevice, events: Sender<TransportEvent>) -> Self {
        Self {
            device,
            events,
            playbacks: HashMap::new(),
        }
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Joins workers that have already finished.
    fn reap(&mut self) {
        let finished: Vec<usize> = self
            .playbacks
            .iter()
            .filter(|(_, playback)| playback.handle.is_finished())
            .map(|(&index, _)| index)
            .collect();
        for index in finished {
            if let Some(playback) = self.playbacks.remove(&index) {
                let _ = playback.handle.join();
            }
        }
    }

    pub fn stop_all(&mut self) {
        let indices: Vec<usize> = self.playbacks.keys().copied().collect();
        for index in indices {
            self.stop(index);
        }
    }
}

impl Transport for ThreadedTransport {
    fn play(&mut self, index: usize, subsequence: &Subsequence) {
        self.stop(index);
        self.reap();

        let control = Arc::new(Control {
            state: Mutex::new(ControlState {
                status: Status::Playing,
                paused_for: Duration::ZERO,
            }),
            wake: Condvar::new(),
        });

        let subsequence = subsequence.clone();
        let device = self.device.clone();
        let events = self.events.clone();
        let worker_control = control.clone();
        let handle = std::thread::spawn(move || {
            play_subsequence(index, &subsequence, &device, &worker_control, &events);
        });

        debug!(index, "playing subsequence");
        self.playbacks.insert(index, Playback { control, handle });
    }

    fn stop(&mut self, index: usize) {
        let Some(playback) = self.playbacks.remove(&index) else {
            return;
        };
        {
            let mut state = playback.control.state.lock();
            if state.status != Status::Finished {
                state.status = Status::Stopped;
            }
        }
        playback.control.wake.notify_all();
        let _ = playback.handle.join();
        debug!(index, "stopped subsequence");
    }

    fn pause(&mut self, index: usize) {
        if let Some(playback) = self.playbacks.get(&index) {
            let mut state = playback.control.state.lock();
            if state.status == Status::Playing {
                state.status = Status::Paused(Instant::now());
            }
        }
    }

    fn resume(&mut self, index: usize) {
        if let Some(playback) = self.playbacks.get(&index) {
            let mut state = playback.control.state.lock();
            if let Status::Paused(since) = state.status {
                state.paused_for += since.elapsed();
                state.status = Status::Playing;
                playback.control.wake.notify_all();
            }
        }
    }

    fn is_playing(&self, index: usize) -> bool {
        self.playbacks.get(&index).is_some_and(|playback| {
            matches!(
                playback.control.state.lock().status,
                Status::Playing | Status::Paused(_)
            )
        })
    }
}

impl Drop for ThreadedTransport {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Blocks until `offset_ms` after `origin` (plus any time spent paused).
/// Returns false if the playback was stopped meanwhile.
fn wait_until(control: &Control, origin: Instant, offset_ms: f64) -> bool {
    let offset = Duration::from_secs_f64(offset_ms.max(0.0) / 1000.0);
    let mut state = control.state.lock();
    loop {
        match state.status {
            Status::Stopped | Status::Finished => return false,
            Status::Paused(_) => control.wake.wait(&mut state),
            Status::Playing => {
                let due = origin + state.paused_for + offset;
                if Instant::now() >= due {
                    return true;
                }
                control.wake.wait_until(&mut state, due);
            }
        }
    }
}

fn play_subsequence(
    index: usize,
    subsequence: &Subsequence,
    device: &SharedDevice,
    control: &Control,
    events: &Sender<TransportEvent>,
) {
    let origin = Instant::now();
    let mut last_reported = None;

    for scheduled in schedule_subsequence(subsequence) {
        if !wait_until(control, origin, scheduled.offset_ms) {
            return;
        }

        let moment = scheduled.moment;
        {
            let mut device = device.lock();
            for message in &moment.messages {
                if let Err(e) = device.send(message.as_bytes(), f64::from(moment.ms_position)) {
                    warn!(index, error = %e, "failed to send message");
                }
            }
        }

        if scheduled.reports_position() && last_reported != Some(moment.ms_position) {
            last_reported = Some(moment.ms_position);
            let _ = events.send(TransportEvent::MsPosition(moment.ms_position));
        }
    }

    if !wait_until(control, origin, subsequence.ms_duration()) {
        return;
    }

    let mut state = control.state.lock();
    if state.status == Status::Playing {
        state.status = Status::Finished;
        drop(state);
        let _ = events.send(TransportEvent::SubsequenceEnded { index });
    }
}

/// One call made to a [`RecordingTransport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCall {
    Play { index: usize, speed: f64 },
    Stop(usize),
    Pause(usize),
    Resume(usize),
}

/// Plays nothing and remembers every call. Clones share the same record.
/// A played subsequence counts as playing until it is stopped or
/// [`finish`](Self::finish)ed.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    playing: Arc<Mutex<Vec<usize>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Indices passed to `play`, in order.
    pub fn played(&self) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Play { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn finish(&self, index: usize) {
        self.playing.lock().retain(|&i| i != index);
    }
}

impl Transport for RecordingTransport {
    fn play(&mut self, index: usize, subsequence: &Subsequence) {
        self.calls.lock().push(TransportCall::Play {
            index,
            speed: subsequence.speed(),
        });
        self.playing.lock().push(index);
    }

    fn stop(&mut self, index: usize) {
        self.calls.lock().push(TransportCall::Stop(index));
        self.finish(index);
    }

    fn pause(&mut self, index: usize) {
        self.calls.lock().push(TransportCall::Pause(index));
    }

    fn resume(&mut self, index: usize) {
        self.calls.lock().push(TransportCall::Resume(index));
    }

    fn is_playing(&self, index: usize) -> bool {
        self.playing.lock().contains(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::Moment;
    use crate::device::{MemoryDevice, shared};
    use crate::events::Message;
    use crate::timing::{Sequence, SpanEnd, Track};

    fn short_sequence() -> Sequence {
        let mut track = Track::new(0);
        let mut first = Moment::with_messages(0, vec![Message::note_on(0, 60, 100)]);
        first.chord_start = true;
        track.append(first, Some(0)).unwrap();
        track
            .append(Moment::with_messages(5, vec![Message::note_off(0, 60, 127)]), None)
            .unwrap();
        Sequence::new(vec![track], 10)
    }

    #[test]
    fn plays_to_the_end_and_reports() {
        let device = MemoryDevice::new();
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut transport = ThreadedTransport::new(shared(device.clone()), tx);

        transport.play(3, &short_sequence().span(0, SpanEnd::EndOfScore));
        let mut events = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
            events.push(event);
            if matches!(event, TransportEvent::SubsequenceEnded { .. }) {
                break;
            }
        }

        assert_eq!(
            events,
            vec![
                TransportEvent::MsPosition(0),
                TransportEvent::SubsequenceEnded { index: 3 },
            ]
        );
        assert_eq!(
            device.messages(),
            vec![Message::note_on(0, 60, 100), Message::note_off(0, 60, 127)]
        );
        assert!(!transport.is_playing(3));
    }

    #[test]
    fn stopped_playback_sends_nothing_more() {
        let mut track = Track::new(0);
        track
            .append(Moment::with_messages(10_000, vec![Message::note_on(0, 60, 100)]), None)
            .unwrap();
        let sequence = Sequence::new(vec![track], 20_000);

        let device = MemoryDevice::new();
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut transport = ThreadedTransport::new(shared(device.clone()), tx);

        transport.play(0, &sequence.span(0, SpanEnd::EndOfScore));
        assert!(transport.is_playing(0));
        transport.pause(0);
        transport.resume(0);
        transport.stop(0);

        assert!(!transport.is_playing(0));
        assert!(device.sent().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn recording_transport_tracks_playing_indices() {
        let recorder = RecordingTransport::new();
        let mut transport = recorder.clone();
        let subsequence = short_sequence().span(0, SpanEnd::EndOfScore);

        transport.play(1, &subsequence);
        assert!(recorder.is_playing(1));
        transport.stop(1);
        assert!(!recorder.is_playing(1));
        assert_eq!(
            recorder.calls(),
            vec![
                TransportCall::Play { index: 1, speed: 1.0 },
                TransportCall::Stop(1)
            ]
        );
    }
}
