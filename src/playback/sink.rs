use anyhow::{Context, Result};
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::queue::PlaybackItem;

/// Audio output
///
/// `play` resolves once the item has finished playing. Dropping the future
/// interrupts playback.
#[async_trait::async_trait]
pub trait AudioSink: Send {
    async fn play(&mut self, item: &PlaybackItem) -> Result<()>;

    /// Get sink name for logging
    fn name(&self) -> &str;
}

/// Sink for machines without a speaker
///
/// Decodes each item to validate it and learn its length, then waits that
/// long, so turn-taking timing matches a real device.
#[derive(Debug, Default)]
pub struct HeadlessSink;

impl HeadlessSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl AudioSink for HeadlessSink {
    async fn play(&mut self, item: &PlaybackItem) -> Result<()> {
        let audio = item.audio.clone();
        let format = item.format.clone();

        let duration = tokio::task::spawn_blocking(move || decoded_duration(audio, &format))
            .await
            .context("Decoder task failed")??;

        debug!("Playing item {} ({:.1}s)", item.id, duration.as_secs_f64());
        tokio::time::sleep(duration).await;

        Ok(())
    }

    fn name(&self) -> &str {
        "headless"
    }
}

/// Decode an encoded payload fully and return its playing time
pub fn decoded_duration(audio: Vec<u8>, format: &str) -> Result<Duration> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(audio)), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Unsupported {} payload", format))?;

    let mut reader = probed.format;
    let track = reader.default_track().context("Payload has no audio track")?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params.sample_rate.context("Payload has no sample rate")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .context("No decoder for payload")?;

    let mut frames: u64 = 0;
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(e).context("Failed to read packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(buffer) => frames += buffer.frames() as u64,
            Err(SymphoniaError::DecodeError(e)) => debug!("Skipping undecodable packet: {}", e),
            Err(e) => return Err(e).context("Failed to decode payload"),
        }
    }

    Ok(Duration::from_secs_f64(frames as f64 / sample_rate as f64))
}
