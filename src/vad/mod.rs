//! Voice activity detection
//!
//! The detector is sampled on a fixed tick by the turn controller, which only
//! arms it while the candidate is expected to speak.

mod detector;

pub use detector::{TickClass, VadConfig, VadEvent, VadTick, VoiceActivityDetector};
