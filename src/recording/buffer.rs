use anyhow::{Context, Result};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::Instant;

use crate::audio::AudioFrame;
use crate::session::TranscriptionMode;

/// Audio captured for the utterance in progress
#[derive(Debug)]
pub struct RecordingBuffer {
    chunks: Vec<AudioFrame>,
    started_at: Instant,
    duration_ms: u64,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            started_at: Instant::now(),
            duration_ms: 0,
        }
    }

    pub fn append(&mut self, frame: AudioFrame) {
        self.duration_ms += frame.duration_ms();
        self.chunks.push(frame);
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Cumulative duration of buffered audio
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Concatenate all chunks into one 16-bit PCM WAV file
    ///
    /// An empty buffer yields a valid WAV with no samples.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let (sample_rate, channels) = self
            .chunks
            .first()
            .map(|f| (f.sample_rate, f.channels))
            .unwrap_or((16000, 1));

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
                .context("Failed to create WAV writer")?;

            for frame in &self.chunks {
                for &sample in &frame.samples {
                    writer.write_sample(sample)
                        .context("Failed to write sample to WAV")?;
                }
            }

            writer.finalize()
                .context("Failed to finalize WAV")?;
        }

        Ok(bytes)
    }
}

impl Default for RecordingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A finalized recording, as handed to the server
#[derive(Debug, Clone, PartialEq)]
pub enum Utterance {
    /// One combined WAV blob, sent as a single `audio` message
    Batch { audio: Vec<u8>, duration: Duration },
    /// Sent incrementally; `chunks` audio_chunk messages followed by a commit
    Streamed { chunks: usize, duration: Duration },
}

impl Utterance {
    pub fn duration(&self) -> Duration {
        match self {
            Utterance::Batch { duration, .. } | Utterance::Streamed { duration, .. } => *duration,
        }
    }

    pub fn mode(&self) -> TranscriptionMode {
        match self {
            Utterance::Batch { .. } => TranscriptionMode::Batch,
            Utterance::Streamed { .. } => TranscriptionMode::Streaming,
        }
    }
}
