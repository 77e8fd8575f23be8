mod clock;
mod scheduler;
mod sequence;
mod track;

pub use clock::{Clock, ManualClock, SystemClock};
pub use scheduler::{ScheduledMoment, schedule_subsequence};
pub use sequence::{Sequence, SpanEnd, Subsequence, SubsequenceKind, assemble_track};
pub use track::Track;
