//! Conversation turn-taking
//!
//! `TurnController` composes capture, VAD, recorder and playback and drives
//! them against the transport. The pieces it relies on are kept pure so they
//! can be tested without I/O:
//! - `TurnState`: the controller's states
//! - `DuplicateResponseFilter`: drops re-delivered responses
//! - `Failsafes`: cancelable watchdog deadlines

mod controller;
mod dedup;
mod failsafe;
mod state;

pub use controller::{ControlCommand, ControllerHandle, EngineEvent, TurnController};
pub use dedup::{DedupConfig, DedupVerdict, DuplicateResponseFilter};
pub use failsafe::{sleep_until_deadline, FailsafeConfig, FailsafeKind, Failsafes, Watchdog};
pub use state::TurnState;
