use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::buffer::{RecordingBuffer, Utterance};
use crate::audio::{pcm_le_bytes, AudioFrame};
use crate::error::EngineError;
use crate::session::TranscriptionMode;
use crate::transport::ClientMessage;

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Audio per `audio_chunk` message in streaming mode
    pub stream_chunk_ms: u64,

    /// Audio captured before onset that is prepended to each recording
    pub pre_roll_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            stream_chunk_ms: 250,
            pre_roll_ms: 200,
        }
    }
}

struct ActiveRecording {
    conversation_id: String,
    buffer: RecordingBuffer,
    /// Samples not yet sent as a stream chunk
    pending: Vec<i16>,
    chunks: usize,
}

/// Server-side transcription stream, streaming mode only
#[derive(Debug, Default)]
enum StreamState {
    #[default]
    Idle,
    /// `audio_stream_start` sent, chunks held until `stream_ready`
    AwaitingReady {
        conversation_id: String,
        queued: VecDeque<String>,
        commit: bool,
    },
    Ready {
        conversation_id: String,
    },
}

/// Turns captured frames into an utterance for the server
///
/// The recorder does no I/O: messages to transmit accumulate in an outbox the
/// controller drains after every call.
pub struct Recorder {
    mode: TranscriptionMode,
    config: RecordingConfig,
    active: Option<ActiveRecording>,
    stream: StreamState,
    /// `stream_ready` replies still owed for cancelled streams
    stale_ready: usize,
    outbox: VecDeque<ClientMessage>,
}

impl Recorder {
    pub fn new(mode: TranscriptionMode, config: RecordingConfig) -> Self {
        Self {
            mode,
            config,
            active: None,
            stream: StreamState::Idle,
            stale_ready: 0,
            outbox: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> TranscriptionMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Audio buffered for the recording in progress
    pub fn buffered(&self) -> Duration {
        self.active
            .as_ref()
            .map(|a| a.buffer.duration())
            .unwrap_or_default()
    }

    /// Start a recording, seeded with pre-roll frames
    pub fn start(
        &mut self,
        conversation_id: &str,
        pre_roll: Vec<AudioFrame>,
    ) -> Result<(), EngineError> {
        if self.active.is_some() {
            return Err(EngineError::Recorder(
                "a recording is already active".to_string(),
            ));
        }

        if self.mode == TranscriptionMode::Streaming {
            if let StreamState::AwaitingReady { .. } = std::mem::take(&mut self.stream) {
                warn!("Previous stream never became ready, abandoning it");
                self.stale_ready += 1;
            }
            self.outbox.push_back(ClientMessage::AudioStreamStart {
                conversation_id: conversation_id.to_string(),
            });
            self.stream = StreamState::AwaitingReady {
                conversation_id: conversation_id.to_string(),
                queued: VecDeque::new(),
                commit: false,
            };
        }

        info!("Recording started ({} mode)", self.mode);
        self.active = Some(ActiveRecording {
            conversation_id: conversation_id.to_string(),
            buffer: RecordingBuffer::new(),
            pending: Vec::new(),
            chunks: 0,
        });

        for frame in pre_roll {
            self.push(&frame);
        }

        Ok(())
    }

    /// Append a captured frame to the recording in progress
    pub fn push(&mut self, frame: &AudioFrame) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        active.buffer.append(frame.clone());

        if self.mode == TranscriptionMode::Streaming {
            active.pending.extend_from_slice(&frame.samples);

            let per_chunk = (frame.sample_rate as u64
                * frame.channels.max(1) as u64
                * self.config.stream_chunk_ms.max(1)
                / 1000)
                .max(1) as usize;

            let mut ready = Vec::new();
            while active.pending.len() >= per_chunk {
                ready.push(active.pending.drain(..per_chunk).collect::<Vec<_>>());
            }
            active.chunks += ready.len();

            for samples in ready {
                self.route_chunk(&samples);
            }
        }
    }

    /// Server confirmed the transcription stream; flush held chunks
    ///
    /// Returns false when the confirmation answers an abandoned stream.
    pub fn on_stream_ready(&mut self) -> bool {
        if self.stale_ready > 0 {
            self.stale_ready -= 1;
            debug!("Ignoring stream_ready for an abandoned stream");
            return false;
        }

        match std::mem::take(&mut self.stream) {
            StreamState::AwaitingReady {
                conversation_id,
                queued,
                commit,
            } => {
                info!("Stream ready, flushing {} held chunks", queued.len());
                for audio in queued {
                    self.outbox.push_back(ClientMessage::AudioChunk {
                        conversation_id: conversation_id.clone(),
                        audio,
                    });
                }

                if commit {
                    self.outbox
                        .push_back(ClientMessage::AudioCommit { conversation_id });
                } else {
                    self.stream = StreamState::Ready { conversation_id };
                }
                true
            }
            other => {
                debug!("Unexpected stream_ready, no stream is starting");
                self.stream = other;
                false
            }
        }
    }

    /// Server reported an error; no `stream_ready` is owed for any stream
    ///
    /// A stream still waiting for confirmation is abandoned together with its
    /// held chunks, and stale-confirmation accounting starts over.
    pub fn on_stream_failed(&mut self) {
        if let StreamState::AwaitingReady { queued, .. } = std::mem::take(&mut self.stream) {
            warn!("Stream abandoned before ready, {} chunks dropped", queued.len());
        }
        if self.stale_ready > 0 {
            debug!("Forgetting {} owed stream_ready replies", self.stale_ready);
            self.stale_ready = 0;
        }
    }

    /// Finalize the recording in progress
    ///
    /// Never fails: an empty recording still produces an utterance (and its
    /// commit in streaming mode). Returns `None` only when nothing was recording.
    pub fn stop(&mut self) -> Option<Utterance> {
        let Some(mut active) = self.active.take() else {
            warn!("Stop requested with no active recording");
            return None;
        };

        let duration = active.buffer.duration();

        let utterance = match self.mode {
            TranscriptionMode::Batch => {
                let audio = active.buffer.to_wav().unwrap_or_else(|e| {
                    error!("Failed to encode utterance: {:#}", e);
                    Vec::new()
                });

                self.outbox.push_back(ClientMessage::Audio {
                    conversation_id: active.conversation_id.clone(),
                    audio: base64::engine::general_purpose::STANDARD.encode(&audio),
                });

                Utterance::Batch { audio, duration }
            }
            TranscriptionMode::Streaming => {
                if !active.pending.is_empty() {
                    let samples = std::mem::take(&mut active.pending);
                    active.chunks += 1;
                    self.route_chunk(&samples);
                }
                self.commit_stream(&active.conversation_id);

                Utterance::Streamed {
                    chunks: active.chunks,
                    duration,
                }
            }
        };

        info!(
            "Recording stopped: {:.1}s, {} frames",
            duration.as_secs_f64(),
            active.buffer.chunk_count()
        );

        Some(utterance)
    }

    /// Discard the recording in progress without sending it
    ///
    /// Returns the duration of discarded audio.
    pub fn cancel(&mut self) -> Option<Duration> {
        let active = self.active.take()?;

        match std::mem::take(&mut self.stream) {
            StreamState::AwaitingReady { .. } => self.stale_ready += 1,
            StreamState::Ready { .. } | StreamState::Idle => {}
        }

        let discarded = active.buffer.duration();
        info!("Recording cancelled: {:.1}s discarded", discarded.as_secs_f64());
        Some(discarded)
    }

    /// Messages to transmit, in order
    pub fn drain_outbox(&mut self) -> Vec<ClientMessage> {
        self.outbox.drain(..).collect()
    }

    fn route_chunk(&mut self, samples: &[i16]) {
        let audio = base64::engine::general_purpose::STANDARD.encode(pcm_le_bytes(samples));

        match &mut self.stream {
            StreamState::Ready { conversation_id } => {
                self.outbox.push_back(ClientMessage::AudioChunk {
                    conversation_id: conversation_id.clone(),
                    audio,
                });
            }
            StreamState::AwaitingReady { queued, .. } => queued.push_back(audio),
            StreamState::Idle => warn!("Dropping audio chunk, no stream open"),
        }
    }

    fn commit_stream(&mut self, conversation_id: &str) {
        if let StreamState::AwaitingReady { commit, .. } = &mut self.stream {
            debug!("Stream not ready yet, commit deferred");
            *commit = true;
            return;
        }

        self.stream = StreamState::Idle;
        self.outbox.push_back(ClientMessage::AudioCommit {
            conversation_id: conversation_id.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ms: u64) -> AudioFrame {
        AudioFrame {
            samples: vec![100; (16 * ms) as usize],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        }
    }

    fn kinds(messages: &[ClientMessage]) -> Vec<&'static str> {
        messages.iter().map(ClientMessage::kind).collect()
    }

    #[test]
    fn test_batch_sends_one_message() {
        let mut recorder = Recorder::new(TranscriptionMode::Batch, RecordingConfig::default());
        recorder.start("conv_0", Vec::new()).unwrap();
        assert!(recorder.drain_outbox().is_empty());

        recorder.push(&frame(100));
        recorder.push(&frame(100));
        assert!(recorder.drain_outbox().is_empty(), "batch mode holds audio until stop");

        let utterance = recorder.stop().unwrap();
        assert_eq!(utterance.duration(), Duration::from_millis(200));
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio"]);
        assert!(!recorder.is_active());
    }

    #[test]
    fn test_only_one_active_recording() {
        let mut recorder = Recorder::new(TranscriptionMode::Batch, RecordingConfig::default());
        recorder.start("conv_0", Vec::new()).unwrap();
        assert!(matches!(
            recorder.start("conv_0", Vec::new()),
            Err(EngineError::Recorder(_))
        ));
    }

    #[test]
    fn test_stop_with_zero_chunks_still_finalizes() {
        let mut recorder = Recorder::new(TranscriptionMode::Batch, RecordingConfig::default());
        recorder.start("conv_0", Vec::new()).unwrap();

        match recorder.stop() {
            Some(Utterance::Batch { audio, duration }) => {
                assert_eq!(duration, Duration::ZERO);
                assert!(audio.starts_with(b"RIFF"));
            }
            other => panic!("unexpected utterance: {:?}", other),
        }
        assert_eq!(recorder.stop(), None);
    }

    #[test]
    fn test_cancel_discards_audio() {
        let mut recorder = Recorder::new(TranscriptionMode::Batch, RecordingConfig::default());
        recorder.start("conv_0", vec![frame(100)]).unwrap();
        recorder.push(&frame(100));

        assert_eq!(recorder.cancel(), Some(Duration::from_millis(200)));
        assert!(recorder.drain_outbox().is_empty());
        assert!(!recorder.is_active());
    }

    #[test]
    fn test_streaming_holds_chunks_until_ready() {
        let mut recorder = Recorder::new(TranscriptionMode::Streaming, RecordingConfig::default());
        recorder.start("conv_0", Vec::new()).unwrap();
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_stream_start"]);

        recorder.push(&frame(250));
        recorder.push(&frame(250));
        assert!(recorder.drain_outbox().is_empty());

        assert!(recorder.on_stream_ready());
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_chunk", "audio_chunk"]);

        recorder.push(&frame(250));
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_chunk"]);

        let utterance = recorder.stop().unwrap();
        assert_eq!(
            utterance,
            Utterance::Streamed {
                chunks: 3,
                duration: Duration::from_millis(750)
            }
        );
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_commit"]);
    }

    #[test]
    fn test_streaming_stop_before_ready_defers_commit() {
        let mut recorder = Recorder::new(TranscriptionMode::Streaming, RecordingConfig::default());
        recorder.start("conv_0", Vec::new()).unwrap();
        recorder.push(&frame(100));
        recorder.stop().unwrap();

        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_stream_start"]);

        assert!(recorder.on_stream_ready());
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_chunk", "audio_commit"]);
    }

    #[test]
    fn test_stale_ready_after_cancel_is_ignored() {
        let mut recorder = Recorder::new(TranscriptionMode::Streaming, RecordingConfig::default());
        recorder.start("conv_0", Vec::new()).unwrap();
        recorder.cancel();

        recorder.start("conv_0", Vec::new()).unwrap();
        recorder.push(&frame(250));
        recorder.drain_outbox();

        // First ready answers the cancelled stream
        assert!(!recorder.on_stream_ready());
        assert!(recorder.drain_outbox().is_empty());

        assert!(recorder.on_stream_ready());
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_chunk"]);
    }

    #[test]
    fn test_server_error_clears_owed_ready() {
        let mut recorder = Recorder::new(TranscriptionMode::Streaming, RecordingConfig::default());
        recorder.start("conv_0", Vec::new()).unwrap();

        // Server refused the stream: error instead of stream_ready
        recorder.cancel();
        recorder.on_stream_failed();
        recorder.drain_outbox();

        recorder.start("conv_0", Vec::new()).unwrap();
        recorder.push(&frame(250));
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_stream_start"]);

        assert!(recorder.on_stream_ready());
        recorder.stop().unwrap();
        assert_eq!(kinds(&recorder.drain_outbox()), vec!["audio_chunk", "audio_commit"]);
    }

    #[test]
    fn test_server_error_drops_deferred_commit() {
        let mut recorder = Recorder::new(TranscriptionMode::Streaming, RecordingConfig::default());
        recorder.start("conv_0", Vec::new()).unwrap();
        recorder.push(&frame(100));
        recorder.stop().unwrap();
        recorder.drain_outbox();

        recorder.on_stream_failed();
        assert!(!recorder.on_stream_ready());
        assert!(recorder.drain_outbox().is_empty());
    }
}
