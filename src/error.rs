//! Error types surfaced by the voice engine

use std::time::Duration;
use thiserror::Error;

/// Errors that end an interview session
#[derive(Error, Debug)]
pub enum EngineError {
    /// The capture device could not be acquired (permission refused, no device).
    /// Fatal to the session, never retried.
    #[error("Capture device unavailable: {0}")]
    CaptureDenied(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    TransportClosed { reason: Option<String> },

    #[error("No assessment received within {0:?}")]
    AssessmentTimeout(Duration),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_message_includes_reason() {
        let err = EngineError::TransportClosed {
            reason: Some("going away".to_string()),
        };
        assert_eq!(err.to_string(), "Connection closed: going away");

        let err = EngineError::TransportClosed { reason: None };
        assert_eq!(err.to_string(), "Connection closed");
    }
}
