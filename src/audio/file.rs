use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            bail!(
                "Unsupported WAV format: {} bits {:?} (expected 16-bit PCM)",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Convert to the target format (mono downmix, integer-ratio decimation)
    pub fn convert(&self, target_rate: u32, target_channels: u16) -> Vec<i16> {
        let mut samples = self.samples.clone();
        let mut channels = self.channels;

        if channels == 2 && target_channels == 1 {
            samples = samples
                .chunks_exact(2)
                .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
                .collect();
            channels = 1;
        }

        let ratio = self.sample_rate / target_rate.max(1);
        if ratio > 1 {
            // Decimate: take every Nth frame
            let frame_len = channels as usize;
            samples = samples
                .chunks_exact(frame_len)
                .step_by(ratio as usize)
                .flatten()
                .copied()
                .collect();
        }

        samples
    }
}

/// Replays a WAV file as if it were a live capture device
///
/// Frames are emitted at real-time pace. Once the file is exhausted the
/// backend keeps producing silent frames until stopped, so downstream
/// voice detection sees the speaker fall silent.
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            bail!("Already capturing");
        }

        let audio = AudioFile::open(&self.path)
            .with_context(|| format!("Failed to open capture file {}", self.path.display()))?;

        let sample_rate = if audio.sample_rate >= self.config.target_sample_rate {
            self.config.target_sample_rate
        } else {
            audio.sample_rate
        };
        let channels = if audio.channels == 2 { self.config.target_channels } else { audio.channels };
        let samples = audio.convert(sample_rate, channels);

        let frame_ms = self.config.buffer_duration_ms.max(10);
        let samples_per_frame =
            (sample_rate as u64 * channels as u64 * frame_ms / 1000) as usize;

        let (tx, rx) = mpsc::channel(100);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(frame_ms));
            let mut offset = 0usize;
            let mut timestamp_ms = 0u64;

            loop {
                ticker.tick().await;

                let end = (offset + samples_per_frame).min(samples.len());
                let mut chunk = samples[offset..end].to_vec();
                offset = end;
                chunk.resize(samples_per_frame, 0);

                let frame = AudioFrame {
                    samples: chunk,
                    sample_rate,
                    channels,
                    timestamp_ms,
                };
                timestamp_ms += frame_ms;

                if tx.send(frame).await.is_err() {
                    debug!("Capture receiver dropped, stopping file replay");
                    break;
                }
            }
        });

        info!("File capture started: {}", self.path.display());
        self.task = Some(task);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped: {}", self.path.display());
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "file"
    }
}
