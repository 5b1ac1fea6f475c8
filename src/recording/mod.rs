//! Utterance recording
//!
//! - `RecordingBuffer`: frames captured since onset
//! - `Recorder`: batch or streaming delivery of those frames to the server
//! - `Utterance`: what was finally handed over

mod buffer;
mod recorder;

pub use buffer::{RecordingBuffer, Utterance};
pub use recorder::{Recorder, RecordingConfig};
