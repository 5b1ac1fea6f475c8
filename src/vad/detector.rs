//! Tick-based voice activity detection over analyser samples
//!
//! Each tick is classified from the speech-band mean and peak of a
//! [`SpectrumFrame`]. Impulsive sounds (high peak, low sustained energy) are
//! classified as [`TickClass::Noise`] and never count as speech.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::audio::SpectrumFrame;

/// Configuration for voice activity detection
///
/// The thresholds are empirically tuned against typical laptop microphones;
/// treat them as starting points for other hardware.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// How often the analyser is sampled (100-150ms)
    pub tick_interval_ms: u64,

    /// Speech-band mean above which a tick may be speech
    pub speech_volume_threshold: f32,

    /// Peak above which a low-energy tick is treated as a click
    pub click_peak_threshold: f32,

    /// Mean below which a high-peak tick is treated as a click
    pub click_average_threshold: f32,

    /// Speech-band mean counted as clearly voiced (feeds the low-activity watchdog)
    pub strong_speech_threshold: f32,

    /// Consecutive speech needed before onset fires
    pub onset_window_ms: u64,

    /// Consecutive non-speech that ends an utterance
    pub silence_duration_ms: u64,

    /// Utterances with less accumulated speech are discarded
    pub speech_min_duration_ms: u64,

    /// Analysis window in samples (bins = fft_size / 2)
    pub fft_size: usize,

    /// First bin of the speech band (lower bins excluded)
    pub band_start_bin: usize,

    /// End of the speech band, exclusive (higher bins excluded)
    pub band_end_bin: usize,

    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            speech_volume_threshold: 35.0,
            click_peak_threshold: 180.0,
            click_average_threshold: 50.0,
            strong_speech_threshold: 45.0,
            onset_window_ms: 100,
            silence_duration_ms: 1000,
            speech_min_duration_ms: 300,
            fft_size: 256,
            band_start_bin: 2,
            band_end_bin: 100,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl VadConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }

    pub fn speech_min_duration(&self) -> Duration {
        Duration::from_millis(self.speech_min_duration_ms)
    }

    pub fn onset_window(&self) -> Duration {
        Duration::from_millis(self.onset_window_ms)
    }
}

/// Classification of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickClass {
    Speech,
    Silence,
    /// Click or pop: loud peak without sustained energy
    Noise,
}

/// Events raised by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech started while no utterance was being tracked
    Onset,
    /// Silence since the last speech tick reached the configured duration
    SustainedSilence {
        silence: Duration,
        /// Speech accumulated since onset
        speech: Duration,
    },
}

/// Result of observing one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadTick {
    pub class: TickClass,
    /// Whether the tick was clearly voiced
    pub strong: bool,
    pub event: Option<VadEvent>,
}

/// Voice activity detector
///
/// Holds no state between interviews: create one per session, or call
/// [`reset`](Self::reset) to start over.
pub struct VoiceActivityDetector {
    config: VadConfig,
    tracking: bool,
    consecutive_speech: Duration,
    silence: Duration,
    speech: Duration,
    silence_reported: bool,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            tracking: false,
            consecutive_speech: Duration::ZERO,
            silence: Duration::ZERO,
            speech: Duration::ZERO,
            silence_reported: false,
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Classify a tick without touching detector state
    pub fn classify(&self, frame: &SpectrumFrame) -> TickClass {
        let is_click = frame.peak > self.config.click_peak_threshold
            && frame.average < self.config.click_average_threshold;

        if frame.average > self.config.speech_volume_threshold {
            if is_click {
                TickClass::Noise
            } else {
                TickClass::Speech
            }
        } else if is_click {
            TickClass::Noise
        } else {
            TickClass::Silence
        }
    }

    /// Observe one tick and advance the detector
    pub fn observe(&mut self, frame: &SpectrumFrame) -> VadTick {
        let class = self.classify(frame);
        let strong = class == TickClass::Speech && frame.average > self.config.strong_speech_threshold;
        let tick = self.config.tick_interval();

        let event = if self.tracking {
            self.observe_tracking(class, tick)
        } else {
            self.observe_idle(class, tick)
        };

        VadTick { class, strong, event }
    }

    fn observe_idle(&mut self, class: TickClass, tick: Duration) -> Option<VadEvent> {
        if class != TickClass::Speech {
            self.consecutive_speech = Duration::ZERO;
            return None;
        }

        self.consecutive_speech += tick;
        if self.consecutive_speech < self.config.onset_window() {
            return None;
        }

        debug!("Speech onset after {:?}", self.consecutive_speech);
        self.tracking = true;
        self.speech = self.consecutive_speech;
        self.silence = Duration::ZERO;
        self.silence_reported = false;
        Some(VadEvent::Onset)
    }

    fn observe_tracking(&mut self, class: TickClass, tick: Duration) -> Option<VadEvent> {
        if class == TickClass::Speech {
            self.speech += tick;
            self.silence = Duration::ZERO;
            self.silence_reported = false;
            return None;
        }

        self.silence += tick;
        if self.silence_reported || self.silence < self.config.silence_duration() {
            return None;
        }

        self.silence_reported = true;
        debug!("Sustained silence {:?} after {:?} of speech", self.silence, self.speech);
        Some(VadEvent::SustainedSilence {
            silence: self.silence,
            speech: self.speech,
        })
    }

    /// Speech accumulated since the last onset
    pub fn speech_duration(&self) -> Duration {
        self.speech
    }

    /// Whether an utterance is being tracked (onset seen, not yet reset)
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Forget all timing state
    pub fn reset(&mut self) {
        self.tracking = false;
        self.consecutive_speech = Duration::ZERO;
        self.silence = Duration::ZERO;
        self.speech = Duration::ZERO;
        self.silence_reported = false;
    }
}
