use crate::chord::Moment;
use crate::error::SequencingError;

/// The moments sent on one output channel, in timestamp order.
///
/// A moment's `ms_position` is its timestamp in the score once it is in a
/// track. Appending at the timestamp of the last moment merges into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub channel: u8,
    moments: Vec<Moment>,
}

impl Track {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            moments: Vec::new(),
        }
    }

    /// Moments must already be in strictly increasing timestamp order.
    pub(crate) fn from_moments(channel: u8, moments: Vec<Moment>) -> Self {
        Self { channel, moments }
    }

    pub fn moments(&self) -> &[Moment] {
        &self.moments
    }

    pub fn len(&self) -> usize {
        self.moments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<u32> {
        self.moments.last().map(|m| m.ms_position)
    }

    pub fn append(
        &mut self,
        mut moment: Moment,
        ms_position_in_score: Option<u32>,
    ) -> Result<(), SequencingError> {
        if ms_position_in_score.is_some() {
            moment.ms_position_in_score = ms_position_in_score;
        }

        match self.moments.last_mut() {
            Some(last) if moment.ms_position < last.ms_position => {
                Err(SequencingError::TrackOutOfOrder {
                    timestamp: moment.ms_position,
                    last: last.ms_position,
                })
            }
            Some(last) if moment.ms_position == last.ms_position => {
                last.merge(moment);
                Ok(())
            }
            _ => {
                self.moments.push(moment);
                Ok(())
            }
        }
    }

    /// Moments with `from <= timestamp < to`, or every moment from `from` on
    /// when `to` is `None`.
    pub fn slice(&self, from: u32, to: Option<u32>) -> &[Moment] {
        let start = self.moments.partition_point(|m| m.ms_position < from);
        let end = match to {
            Some(to) => self.moments.partition_point(|m| m.ms_position < to),
            None => self.moments.len(),
        };
        &self.moments[start..end.max(start)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Message;

    #[test]
    fn equal_timestamps_merge_and_keep_tags() {
        let mut track = Track::new(0);
        track
            .append(Moment::with_messages(0, vec![Message::note_on(0, 60, 100)]), None)
            .unwrap();

        let mut rest = Moment::with_messages(100, vec![Message::note_off(0, 60, 127)]);
        rest.rest_start = true;
        track.append(rest, Some(100)).unwrap();

        let mut chord = Moment::with_messages(100, vec![Message::note_on(0, 62, 90)]);
        chord.chord_start = true;
        track.append(chord, Some(100)).unwrap();

        assert_eq!(track.len(), 2);
        let last = &track.moments()[1];
        assert!(last.rest_start && last.chord_start);
        assert_eq!(last.messages.len(), 2);
        assert_eq!(last.ms_position_in_score, Some(100));
    }

    #[test]
    fn out_of_order_append_is_rejected() {
        let mut track = Track::new(0);
        track.append(Moment::new(50), None).unwrap();
        assert_eq!(
            track.append(Moment::new(40), None),
            Err(SequencingError::TrackOutOfOrder {
                timestamp: 40,
                last: 50
            })
        );
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn slice_is_half_open() {
        let mut track = Track::new(0);
        for ms in [0, 10, 20, 30] {
            track.append(Moment::new(ms), None).unwrap();
        }
        let positions = |moments: &[Moment]| moments.iter().map(|m| m.ms_position).collect::<Vec<_>>();
        assert_eq!(positions(track.slice(10, Some(30))), vec![10, 20]);
        assert_eq!(positions(track.slice(15, None)), vec![20, 30]);
        assert!(track.slice(40, Some(10)).is_empty());
    }
}
