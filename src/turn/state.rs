use serde::{Deserialize, Serialize};
use std::fmt;

/// Turn-taking state of one interview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Connecting,
    AwaitingGreeting,
    /// Interviewer audio is playing
    AiSpeaking,
    /// Waiting for the candidate to speak
    Listening,
    Recording,
    /// Utterance sent, waiting for the interviewer's response
    Processing,
    Ended,
    Errored,
}

impl TurnState {
    /// States in which VAD ticks may be evaluated
    ///
    /// Never true while interviewer audio plays or a response is pending, so
    /// the interviewer's own voice cannot be recorded back.
    pub fn accepts_vad(self) -> bool {
        matches!(self, TurnState::Listening | TurnState::Recording)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Ended | TurnState::Errored)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Connecting => "connecting",
            TurnState::AwaitingGreeting => "awaiting_greeting",
            TurnState::AiSpeaking => "ai_speaking",
            TurnState::Listening => "listening",
            TurnState::Recording => "recording",
            TurnState::Processing => "processing",
            TurnState::Ended => "ended",
            TurnState::Errored => "errored",
        };
        f.write_str(name)
    }
}
