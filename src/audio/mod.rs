pub mod analyser;
pub mod backend;
pub mod capture;
pub mod file;

pub use analyser::{SpectrumAnalyser, SpectrumFrame};
pub use backend::{
    pcm_le_bytes, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource,
};
pub use capture::CaptureSession;
pub use file::{AudioFile, FileBackend};
