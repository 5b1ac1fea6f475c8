// Frequency-domain analyser feeding voice activity detection
//
// Keeps a sliding window of the most recent samples and, on request,
// produces byte-scaled magnitudes per frequency bin (0 = at or below
// `min_decibels`, 255 = at or above `max_decibels`), plus the mean and peak
// over the speech band.

use std::collections::VecDeque;
use std::f32::consts::PI;
use tokio::time::Instant;

use super::backend::AudioFrame;
use crate::vad::VadConfig;

/// One analyser sample, taken on a VAD tick
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    /// Byte-scaled magnitude per frequency bin
    pub bins: Vec<u8>,
    /// Mean magnitude over the speech band
    pub average: f32,
    /// Highest magnitude in the speech band
    pub peak: f32,
    pub taken_at: Instant,
}

impl SpectrumFrame {
    /// Build a frame from bin magnitudes, measuring over `band_start..band_end`
    pub fn from_bins(bins: Vec<u8>, band_start: usize, band_end: usize) -> Self {
        let end = band_end.min(bins.len());
        let start = band_start.min(end);
        let band = &bins[start..end];

        let (sum, peak) = band
            .iter()
            .fold((0u32, 0u8), |(sum, peak), &b| (sum + b as u32, peak.max(b)));
        let average = if band.is_empty() { 0.0 } else { sum as f32 / band.len() as f32 };

        Self {
            bins,
            average,
            peak: peak as f32,
            taken_at: Instant::now(),
        }
    }

    /// A frame with fixed statistics and no bin data
    pub fn with_levels(average: f32, peak: f32) -> Self {
        Self {
            bins: Vec::new(),
            average,
            peak,
            taken_at: Instant::now(),
        }
    }
}

pub struct SpectrumAnalyser {
    fft_size: usize,
    band_start: usize,
    band_end: usize,
    min_decibels: f32,
    max_decibels: f32,
    window: Vec<f32>,
    samples: VecDeque<f32>,
}

impl SpectrumAnalyser {
    pub fn new(config: &VadConfig) -> Self {
        let fft_size = config.fft_size.max(32);
        let window = (0..fft_size)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / fft_size as f32).cos())
            .collect();

        Self {
            fft_size,
            band_start: config.band_start_bin,
            band_end: config.band_end_bin,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            window,
            samples: VecDeque::with_capacity(fft_size),
        }
    }

    /// Number of frequency bins produced per sample
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Push a captured frame into the analysis window (first channel only)
    pub fn push(&mut self, frame: &AudioFrame) {
        let step = frame.channels.max(1) as usize;
        for &sample in frame.samples.iter().step_by(step) {
            if self.samples.len() == self.fft_size {
                self.samples.pop_front();
            }
            self.samples.push_back(sample as f32 / i16::MAX as f32);
        }
    }

    /// Drop buffered samples
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Take a spectrum sample of the current window
    pub fn sample(&self) -> SpectrumFrame {
        let n = self.fft_size;
        let pad = n - self.samples.len();
        let input: Vec<f32> = std::iter::repeat(0.0)
            .take(pad)
            .chain(self.samples.iter().copied())
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();

        let range = (self.max_decibels - self.min_decibels).max(f32::EPSILON);
        let bins = (0..self.bin_count())
            .map(|k| {
                let (mut re, mut im) = (0.0f32, 0.0f32);
                for (i, &x) in input.iter().enumerate() {
                    let angle = 2.0 * PI * (k * i) as f32 / n as f32;
                    re += x * angle.cos();
                    im -= x * angle.sin();
                }
                let magnitude = (re * re + im * im).sqrt() / n as f32;
                let db = 20.0 * magnitude.max(1e-12).log10();
                let scaled = 255.0 * (db - self.min_decibels) / range;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect();

        SpectrumFrame::from_bins(bins, self.band_start, self.band_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        }
    }

    /// Deterministic broadband noise
    fn noise(len: usize, amplitude: f32) -> Vec<i16> {
        let mut state: u32 = 0x1234_5678;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let unit = (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
                (unit * amplitude * i16::MAX as f32) as i16
            })
            .collect()
    }

    #[test]
    fn test_band_statistics() {
        let bins = vec![255, 10, 20, 30, 40, 255];
        let frame = SpectrumFrame::from_bins(bins, 1, 5);
        assert_eq!(frame.average, 25.0);
        assert_eq!(frame.peak, 40.0);
    }

    #[test]
    fn test_silence_is_zero() {
        let config = VadConfig::default();
        let mut analyser = SpectrumAnalyser::new(&config);
        analyser.push(&frame(vec![0; 1600]));

        let sample = analyser.sample();
        assert_eq!(sample.bins.len(), config.fft_size / 2);
        assert_eq!(sample.average, 0.0);
        assert_eq!(sample.peak, 0.0);
    }

    #[test]
    fn test_noise_exceeds_speech_threshold() {
        let config = VadConfig::default();
        let mut analyser = SpectrumAnalyser::new(&config);
        analyser.push(&frame(noise(1600, 0.3)));

        let sample = analyser.sample();
        assert!(
            sample.average > config.speech_volume_threshold,
            "broadband noise average {} should exceed {}",
            sample.average,
            config.speech_volume_threshold
        );
    }

    #[test]
    fn test_window_keeps_latest_samples() {
        let config = VadConfig::default();
        let mut analyser = SpectrumAnalyser::new(&config);
        analyser.push(&frame(noise(1600, 0.3)));
        analyser.push(&frame(vec![0; 1600]));

        // Window is fully replaced by the silent frame
        assert_eq!(analyser.sample().average, 0.0);
    }
}
