use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transport::ProviderSelection;

/// How utterances reach the server's speech-to-text provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionMode {
    /// Whole utterance in one `audio` message
    #[default]
    Batch,
    /// `audio_stream_start`, incremental `audio_chunk`s, then `audio_commit`
    Streaming,
}

impl fmt::Display for TranscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptionMode::Batch => write!(f, "batch"),
            TranscriptionMode::Streaming => write!(f, "streaming"),
        }
    }
}

/// Configuration for one interview session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interview to join (e.g. from the invitation link)
    pub interview_id: Option<String>,

    /// Application the interview belongs to, for servers that resolve by application
    pub application_id: Option<String>,

    /// Providers requested for this interview
    pub providers: ProviderSelection,

    /// Transport mode, fixed for the whole session
    pub mode: TranscriptionMode,
}
