//! Per-frame volume analysis
//!
//! Mirrors a browser analyser node: a Blackman-windowed FFT over the most
//! recent `fft_size` samples, temporally smoothed magnitudes, mapped onto
//! a byte scale between `min_decibels` and `max_decibels`. The frame level is
//! the mean byte value expressed in decibels relative to full scale (255).

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Level reported for a frame with no measurable energy
pub const SILENCE_FLOOR_DB: f32 = -100.0;

/// Analyser settings
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// FFT window size (power of two)
    pub fft_size: usize,
    /// Temporal smoothing between frames (0.0-1.0)
    pub smoothing: f32,
    /// Magnitude in dB mapped to byte 0
    pub min_decibels: f32,
    /// Magnitude in dB mapped to byte 255
    pub max_decibels: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            smoothing: 0.5,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

/// Convert an average byte magnitude (0-255) to decibels
///
/// Zero or negative energy maps to [`SILENCE_FLOOR_DB`] instead of `-inf`.
#[must_use]
pub fn magnitude_to_db(average: f32) -> f32 {
    if average > 0.0 {
        20.0 * (average / 255.0).log10()
    } else {
        SILENCE_FLOOR_DB
    }
}

/// FFT-based frame level meter
pub struct VolumeAnalyzer {
    config: AnalyzerConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl VolumeAnalyzer {
    /// Create an analyser with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default())
    }

    /// Create an analyser with custom settings
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn with_config(config: AnalyzerConfig) -> Self {
        let n = config.fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);

        // Blackman window
        let window = (0..n)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
                0.08f32.mul_add((2.0 * x).cos(), 0.42 - 0.5 * x.cos())
            })
            .collect();

        Self {
            config: AnalyzerConfig {
                fft_size: n,
                ..config
            },
            fft,
            window,
            smoothed: vec![0.0; n / 2],
            scratch: vec![Complex::new(0.0, 0.0); n],
        }
    }

    /// Analyse one frame and return its level in dB
    pub fn analyze(&mut self, frame: &[f32]) -> f32 {
        let bytes = self.byte_frequency_data(frame);
        magnitude_to_db(average(&bytes))
    }

    /// Spectrum of the latest window as bytes (0-255), one per bin
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn byte_frequency_data(&mut self, frame: &[f32]) -> Vec<u8> {
        let n = self.config.fft_size;

        // Latest n samples, zero-padded at the front when the frame is short
        let tail = &frame[frame.len().saturating_sub(n)..];
        let offset = n - tail.len();
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < offset { 0.0 } else { tail[i - offset] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let tau = self.config.smoothing;
        let range = self.config.max_decibels - self.config.min_decibels;
        let scale = 1.0 / n as f32;

        self.smoothed
            .iter_mut()
            .zip(&self.scratch)
            .map(|(prev, bin)| {
                let magnitude = bin.norm() * scale;
                let value = tau.mul_add(*prev, (1.0 - tau) * magnitude);
                *prev = if value.is_finite() { value } else { 0.0 };

                if *prev <= 0.0 {
                    return 0;
                }
                let db = 20.0 * prev.log10();
                let byte = 255.0 / range * (db - self.config.min_decibels);
                byte.clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Forget smoothing history
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }
}

impl Default for VolumeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_precision_loss)]
fn average(bytes: &[u8]) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }
    let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
    sum as f32 / bytes.len() as f32
}
