use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::analyser::{SpectrumAnalyser, SpectrumFrame};
use super::backend::{AudioBackend, AudioFrame};
use crate::vad::VadConfig;

/// Exclusive owner of the capture device and its analyser for one session
///
/// Other components only read from it: the VAD samples the analyser, the
/// recorder receives copies of captured frames.
pub struct CaptureSession {
    backend: Box<dyn AudioBackend>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    analyser: SpectrumAnalyser,
    pre_roll: VecDeque<AudioFrame>,
    pre_roll_ms: u64,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn AudioBackend>, vad: &VadConfig, pre_roll_ms: u64) -> Self {
        Self {
            backend,
            frames: None,
            analyser: SpectrumAnalyser::new(vad),
            pre_roll: VecDeque::new(),
            pre_roll_ms,
        }
    }

    /// Acquire the capture device
    pub async fn start(&mut self) -> Result<()> {
        if self.frames.is_some() {
            bail!("Capture already started");
        }

        let rx = self
            .backend
            .start()
            .await
            .with_context(|| format!("Failed to start {} capture", self.backend.name()))?;

        info!("Capture started: {}", self.backend.name());
        self.frames = Some(rx);

        Ok(())
    }

    /// Wait for the next captured frame
    ///
    /// Pends forever once the device is stopped or its stream has ended.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        let Some(rx) = self.frames.as_mut() else {
            return std::future::pending().await;
        };

        match rx.recv().await {
            Some(frame) => Some(frame),
            None => {
                warn!("Capture stream from {} ended", self.backend.name());
                self.frames = None;
                None
            }
        }
    }

    /// Feed a captured frame into the analyser and pre-roll buffer
    pub fn ingest(&mut self, frame: &AudioFrame) {
        self.analyser.push(frame);

        self.pre_roll.push_back(frame.clone());
        let mut buffered: u64 = self.pre_roll.iter().map(AudioFrame::duration_ms).sum();
        while buffered > self.pre_roll_ms {
            match self.pre_roll.pop_front() {
                Some(old) => buffered -= old.duration_ms(),
                None => break,
            }
        }
    }

    /// Sample the analyser
    pub fn sample(&self) -> SpectrumFrame {
        self.analyser.sample()
    }

    /// Frames captured just before now, oldest first
    pub fn take_pre_roll(&mut self) -> Vec<AudioFrame> {
        self.pre_roll.drain(..).collect()
    }

    /// Forget buffered audio, e.g. after the interviewer finished speaking
    pub fn clear(&mut self) {
        self.analyser.reset();
        self.pre_roll.clear();
    }

    pub fn is_active(&self) -> bool {
        self.frames.is_some()
    }

    /// Release the capture device
    pub async fn stop(&mut self) -> Result<()> {
        self.frames = None;
        self.pre_roll.clear();
        if self.backend.is_capturing() {
            self.backend.stop().await?;
            info!("Capture released: {}", self.backend.name());
        }
        Ok(())
    }
}
