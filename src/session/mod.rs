//! Interview session state
//!
//! This module provides the per-interview value types:
//! - `Session`: identifiers, transport mode, phase and time limit
//! - `SessionConfig`: what the candidate asked for when starting
//! - `SessionStats` / `SessionReport`: what happened, returned on close

mod config;
mod session;
mod stats;

pub use config::{SessionConfig, TranscriptionMode};
pub use session::{Session, MAX_TIME_LIMIT_SECONDS};
pub use stats::{SessionReport, SessionStats, Speaker, TranscriptEntry};
