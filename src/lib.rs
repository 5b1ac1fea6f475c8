pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod providers;
pub mod recording;
pub mod session;
pub mod transport;
pub mod turn;
pub mod vad;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource,
    CaptureSession, FileBackend, SpectrumAnalyser, SpectrumFrame,
};
pub use config::{Config, TransportKind};
pub use error::EngineError;
pub use playback::{AudioSink, HeadlessSink, PlaybackEvent, PlaybackItem, PlaybackQueue, Player};
pub use providers::{ProviderCatalog, ProvidersClient};
pub use recording::{Recorder, RecordingBuffer, RecordingConfig, Utterance};
pub use session::{
    Session, SessionConfig, SessionReport, SessionStats, Speaker, TranscriptEntry,
    TranscriptionMode,
};
pub use transport::{
    ClientMessage, MemoryServer, MemoryTransport, NatsTransport, ProviderSelection,
    ServerMessage, Transport, TransportEvent, WebSocketTransport,
};
pub use turn::{ControllerHandle, EngineEvent, TurnController, TurnState};
pub use vad::{VadConfig, VoiceActivityDetector};
