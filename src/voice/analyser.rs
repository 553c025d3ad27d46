//! Analysis tap on the playback output for visualizers

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

/// Default analysis window (matches a 256-point FFT)
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Decibel range mapped onto 0..=255 byte magnitudes
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Rolling window of the most recent output samples
///
/// Cloning is cheap; all clones observe the same window. The playback path
/// writes, visualizers read.
#[derive(Debug, Clone)]
pub struct AnalyserTap {
    window: Arc<Mutex<VecDeque<f32>>>,
    fft_size: usize,
}

impl AnalyserTap {
    /// Create a tap holding `fft_size` samples
    #[must_use]
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        Self {
            window: Arc::new(Mutex::new(VecDeque::from(vec![0.0; fft_size]))),
            fft_size,
        }
    }

    /// Window length in samples
    #[must_use]
    pub const fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of frequency bins reported
    #[must_use]
    pub const fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Append output samples, keeping only the latest window
    pub fn write(&self, samples: &[f32]) {
        let Ok(mut window) = self.window.lock() else {
            return;
        };
        let skip = samples.len().saturating_sub(self.fft_size);
        for &s in &samples[skip..] {
            if window.len() == self.fft_size {
                window.pop_front();
            }
            window.push_back(s);
        }
    }

    /// Copy of the current window, oldest first
    #[must_use]
    pub fn time_domain_data(&self) -> Vec<f32> {
        self.window
            .lock()
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Root-mean-square level of the current window
    #[must_use]
    pub fn rms(&self) -> f32 {
        calculate_rms(&self.time_domain_data())
    }

    /// Blackman-windowed magnitude spectrum scaled to bytes
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn byte_frequency_data(&self) -> Vec<u8> {
        let samples = self.time_domain_data();
        let n = samples.len();
        let nf = n as f32;

        let windowed: Vec<f32> = samples
            .iter()
            .enumerate()
            .map(|(i, &s)| s * blackman(i, n))
            .collect();

        (0..n / 2)
            .map(|k| {
                let (mut re, mut im) = (0.0f32, 0.0f32);
                for (i, &s) in windowed.iter().enumerate() {
                    let angle = -2.0 * PI * (k * i) as f32 / nf;
                    re = s.mul_add(angle.cos(), re);
                    im = s.mul_add(angle.sin(), im);
                }
                let magnitude = re.hypot(im) / nf;
                let db = if magnitude > 0.0 {
                    20.0 * magnitude.log10()
                } else {
                    MIN_DECIBELS
                };
                let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

/// Blackman window coefficient for sample `i` of `n`
#[allow(clippy::cast_precision_loss)]
fn blackman(i: usize, n: usize) -> f32 {
    let x = i as f32 / n as f32;
    0.08f32.mul_add((4.0 * PI * x).cos(), 0.5f32.mul_add(-(2.0 * PI * x).cos(), 0.42))
}

impl Default for AnalyserTap {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

/// Calculate RMS energy
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
