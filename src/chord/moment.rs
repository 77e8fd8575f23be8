use crate::events::Message;

/// Logically simultaneous messages at one position.
///
/// Inside a chord `ms_position` is relative to the start of the chord; once a
/// moment has been appended to a [`Track`](crate::timing::Track) it is the
/// moment's timestamp in the score.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Moment {
    pub ms_position: u32,
    pub messages: Vec<Message>,
    /// First moment of a chord.
    pub chord_start: bool,
    /// First moment of a rest.
    pub rest_start: bool,
    /// Score position of the chord or rest this moment starts, for cursors.
    pub ms_position_in_score: Option<u32>,
}

impl Moment {
    pub fn new(ms_position: u32) -> Self {
        Self {
            ms_position,
            ..Default::default()
        }
    }

    pub fn with_messages(ms_position: u32, messages: Vec<Message>) -> Self {
        Self {
            ms_position,
            messages,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends the other moment's messages after this one's and keeps both
    /// moments' boundary tags.
    pub fn merge(&mut self, other: Moment) {
        self.messages.extend(other.messages);
        self.chord_start |= other.chord_start;
        self.rest_start |= other.rest_start;
        if other.ms_position_in_score.is_some() {
            self.ms_position_in_score = other.ms_position_in_score;
        }
    }

    /// Inserts messages in front of this moment's own, keeping their order.
    pub fn prepend(&mut self, messages: &[Message]) {
        self.messages.splice(0..0, messages.iter().copied());
    }

    /// A copy of this moment moved to another position.
    pub fn at(&self, ms_position: u32) -> Moment {
        Moment {
            ms_position,
            ..self.clone()
        }
    }
}

/// A moment yielded by a chord cursor: the stored moment, borrowed, at the
/// position it plays in this pass. Repeated passes share the same messages.
#[derive(Debug, Clone, Copy)]
pub struct PlacedMoment<'a> {
    pub ms_position_in_chord: u32,
    pub index: usize,
    pub moment: &'a Moment,
}
