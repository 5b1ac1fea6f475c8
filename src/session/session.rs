use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::config::{SessionConfig, TranscriptionMode};

/// Longest interview time limit honoured (one day)
pub const MAX_TIME_LIMIT_SECONDS: u64 = 24 * 60 * 60;

/// One interview, from start to close
///
/// Created by the turn controller when the interview starts and dropped with
/// it; never shared between interviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Local identifier, used in logs before the server assigns a conversation
    pub local_id: Uuid,

    /// Server-assigned conversation, known once the greeting arrives
    pub conversation_id: Option<String>,

    pub interview_id: Option<String>,

    pub mode: TranscriptionMode,

    /// Server-reported phase (`audio_check`, `name_check`, `interview`)
    pub phase: Option<String>,

    /// Interview time limit announced by the server
    pub time_limit_seconds: Option<u64>,

    pub candidate_name: Option<String>,
}

impl Session {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            conversation_id: None,
            interview_id: config.interview_id.clone(),
            mode: config.mode,
            phase: None,
            time_limit_seconds: None,
            candidate_name: None,
        }
    }

    /// Identifier to show in logs
    pub fn label(&self) -> String {
        match &self.conversation_id {
            Some(id) => id.clone(),
            None => format!("local-{}", self.local_id),
        }
    }

    /// Record the server-announced time limit, capped at [`MAX_TIME_LIMIT_SECONDS`]
    pub fn set_time_limit_minutes(&mut self, minutes: f64) {
        if !(minutes.is_finite() && minutes > 0.0) {
            return;
        }

        let seconds = (minutes * 60.0).round();
        if seconds > MAX_TIME_LIMIT_SECONDS as f64 {
            warn!("Time limit of {} minutes capped at {}s", minutes, MAX_TIME_LIMIT_SECONDS);
            self.time_limit_seconds = Some(MAX_TIME_LIMIT_SECONDS);
        } else {
            self.time_limit_seconds = Some(seconds as u64);
        }
    }
}
