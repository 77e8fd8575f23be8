use super::Subsequence;
use crate::chord::Moment;

/// A moment of a subsequence, timed from the start of its playback.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledMoment<'a> {
    pub offset_ms: f64,
    pub moment: &'a Moment,
}

impl ScheduledMoment<'_> {
    /// Chord and rest starts are the positions a score cursor follows.
    pub fn reports_position(&self) -> bool {
        self.moment.chord_start || self.moment.rest_start
    }
}

/// Merges every track of the subsequence into one timeline, scaled by the
/// subsequence's speed. Moments with equal timestamps keep track order.
pub fn schedule_subsequence(subsequence: &Subsequence) -> Vec<ScheduledMoment<'_>> {
    let origin = subsequence.ms_position;
    let speed = subsequence.speed();

    let mut scheduled: Vec<ScheduledMoment<'_>> = subsequence
        .tracks()
        .iter()
        .flat_map(|track| track.moments())
        .map(|moment| ScheduledMoment {
            offset_ms: f64::from(moment.ms_position.saturating_sub(origin)) * speed,
            moment,
        })
        .collect();

    scheduled.sort_by_key(|s| s.moment.ms_position);
    scheduled
}
