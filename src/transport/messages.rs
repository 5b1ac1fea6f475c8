use serde::{Deserialize, Serialize};

/// Provider selections sent with `start_interview`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
}

/// Messages sent from the candidate's engine to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartInterview {
        #[serde(skip_serializing_if = "Option::is_none")]
        interview_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        application_id: Option<String>,
        #[serde(flatten)]
        providers: ProviderSelection,
    },
    /// Whole utterance, batch mode
    Audio {
        conversation_id: String,
        audio: String, // Base64-encoded WAV
    },
    AudioStreamStart {
        conversation_id: String,
    },
    AudioChunk {
        conversation_id: String,
        audio: String, // Base64-encoded PCM16 LE
    },
    AudioCommit {
        conversation_id: String,
    },
    EndInterview {
        conversation_id: String,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::StartInterview { .. } => "start_interview",
            ClientMessage::Audio { .. } => "audio",
            ClientMessage::AudioStreamStart { .. } => "audio_stream_start",
            ClientMessage::AudioChunk { .. } => "audio_chunk",
            ClientMessage::AudioCommit { .. } => "audio_commit",
            ClientMessage::EndInterview { .. } => "end_interview",
        }
    }
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Greeting {
        conversation_id: String,
        text: String,
        #[serde(default)]
        audio: String,
        #[serde(default = "default_audio_format")]
        audio_format: String,
        #[serde(default)]
        phase: Option<String>,
        #[serde(default, alias = "timeLimitMinutes")]
        time_limit_minutes: Option<f64>,
    },
    StreamReady {
        conversation_id: String,
    },
    Response {
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        user_text: String,
        interviewer_text: String,
        #[serde(default)]
        audio: String,
        #[serde(default = "default_audio_format")]
        audio_format: String,
        #[serde(default)]
        phase: Option<String>,
        #[serde(default)]
        candidate_name: Option<String>,
    },
    Assessment {
        assessment: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Greeting { .. } => "greeting",
            ServerMessage::StreamReady { .. } => "stream_ready",
            ServerMessage::Response { .. } => "response",
            ServerMessage::Assessment { .. } => "assessment",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_interview_flattens_providers() {
        let msg = ClientMessage::StartInterview {
            interview_id: Some("int-1".to_string()),
            application_id: None,
            providers: ProviderSelection {
                stt_provider: Some("elevenlabs_streaming".to_string()),
                ..Default::default()
            },
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "start_interview");
        assert_eq!(value["interview_id"], "int-1");
        assert_eq!(value["stt_provider"], "elevenlabs_streaming");
        assert!(value.get("application_id").is_none());
        assert!(value.get("tts_provider").is_none());
    }

    #[test]
    fn test_response_without_optional_fields() {
        let json = r#"{
            "type": "response",
            "user_text": "I worked on compilers",
            "interviewer_text": "Tell me more.",
            "audio": "AAAA",
            "audio_format": "wav"
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::Response { conversation_id, interviewer_text, audio_format, phase, .. } => {
                assert_eq!(conversation_id, None);
                assert_eq!(interviewer_text, "Tell me more.");
                assert_eq!(audio_format, "wav");
                assert_eq!(phase, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = r#"{"type": "telemetry", "value": 1}"#;
        assert!(serde_json::from_str::<ServerMessage>(json).is_err());
    }
}
