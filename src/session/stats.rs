use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::Session;

/// Statistics about an interview session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Completed AI-speaks / candidate-speaks alternations
    pub turns: usize,

    /// Utterances finalized and sent to the server
    pub utterances_sent: usize,

    /// Recordings discarded as too short
    pub utterances_discarded: usize,

    /// Responses dropped as duplicates
    pub responses_dropped: usize,

    /// Interviewer audio fragments that failed to play
    pub playback_failures: usize,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            duration_secs: 0.0,
            turns: 0,
            utterances_sent: 0,
            utterances_discarded: 0,
            responses_dropped: 0,
            playback_failures: 0,
        }
    }

    /// Refresh the duration from the start time
    pub fn touch(&mut self) {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        self.duration_secs = elapsed.num_milliseconds() as f64 / 1000.0;
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Interviewer,
    Candidate,
}

/// A single line of the interview transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,

    pub text: String,

    /// When this line was received
    pub timestamp: DateTime<Utc>,
}

/// Everything known about a session once it has closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: Session,
    pub stats: SessionStats,
    pub transcript: Vec<TranscriptEntry>,
    /// Final assessment, if the server delivered one
    pub assessment: Option<String>,
}
