use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

use crate::audio::AudioBackendConfig;
use crate::error::EngineError;
use crate::recording::RecordingConfig;
use crate::turn::{DedupConfig, FailsafeConfig};
use crate::vad::VadConfig;

/// Default configuration file, read if present
pub const DEFAULT_CONFIG_PATH: &str = "config/interview-voice.toml";

/// Environment variables override the file: `INTERVIEW_VOICE__VAD__SILENCE_DURATION_MS=1200`
pub const ENV_PREFIX: &str = "INTERVIEW_VOICE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub recording: RecordingConfig,
    pub playback: PlaybackConfig,
    pub failsafe: FailsafeConfig,
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    WebSocket,
    Nats,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Duplex channel endpoint
    pub url: String,

    /// Base URL of the HTTP API (providers catalog)
    pub api_url: String,

    pub transport: TransportKind,

    /// Used when `transport = "nats"`
    pub nats_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            api_url: "http://localhost:8000".to_string(),
            transport: TransportKind::WebSocket,
            nats_url: "nats://localhost:4222".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Capture frame length
    pub frame_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_ms: 100,
        }
    }
}

impl AudioConfig {
    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.sample_rate,
            target_channels: self.channels,
            buffer_duration_ms: self.frame_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Pause after each interviewer fragment before the next starts
    pub settle_delay_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 300,
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit `path` must exist; without one, [`DEFAULT_CONFIG_PATH`] is
    /// read if present. Environment variables are layered on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        let settings = config::Config::builder()
            .add_source(config::File::from(file).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::Config(format!("{}: {}", file.display(), e)))?;

        let config = settings
            .try_deserialize()
            .map_err(|e| EngineError::Config(format!("invalid value: {}", e)))?;
        Ok(config)
    }
}
