//! Interviewer audio playback
//!
//! - `PlaybackQueue`: which item plays next (newest wins, one at a time)
//! - `Player`: spawned task driving an `AudioSink` through the queue
//! - `HeadlessSink`: decode-and-wait sink for machines without a speaker

mod player;
mod queue;
mod sink;

pub use player::{PlaybackEvent, Player};
pub use queue::{PlaybackItem, PlaybackQueue};
pub use sink::{decoded_duration, AudioSink, HeadlessSink};
