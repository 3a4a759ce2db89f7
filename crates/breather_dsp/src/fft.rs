//! FFT Spectrum Analyzer
//!
//! Produces the optional pre/post spectrum snapshots. The audio thread only
//! forwards mono samples through a ring buffer; this analyzer lives on the
//! control side, accumulates those samples and computes a new spectrum
//! every `sample_rate / fps` samples.
//!
//! # Output
//!
//! [`FFT_MESH_POINTS`] log-spaced points between [`MESH_MIN_HZ`] and
//! [`MESH_MAX_HZ`], each mapped from -72..0 dB (plus the user shift) to
//! 0.0..1.0 and smoothed with a reactivity time constant.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// FFT size (must be power of 2)
/// 4096 samples at 48kHz = ~85ms window, ~12Hz resolution
pub const FFT_SIZE: usize = 4096;

/// Number of log-spaced output points
pub const FFT_MESH_POINTS: usize = 640;

pub const MESH_MIN_HZ: f32 = 10.0;
pub const MESH_MAX_HZ: f32 = 24000.0;

/// Level mapped to 0.0
const FLOOR_DB: f32 = -72.0;

/// Hann window coefficient
fn hann_window(n: usize, size: usize) -> f32 {
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
}

/// Spectrum analyzer fed from a sample stream
pub struct SpectrumAnalyzer {
    sample_rate: f32,
    /// Circular history of the most recent FFT_SIZE samples
    history: Vec<f32>,
    write_pos: usize,
    samples_since_fft: usize,
    samples_per_fft: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    /// FFT bin (fractional) for each mesh point
    mesh_bins: Vec<f32>,
    spectrum: Vec<f32>,
    /// Smoothing factor per analysis frame
    decay: f32,
    shift_db: f32,
}

impl SpectrumAnalyzer {
    /// Create a new spectrum analyzer
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `fps` - Target update rate for spectrum
    pub fn new(sample_rate: f32, fps: u32) -> Self {
        let samples_per_fft = ((sample_rate / fps.max(1) as f32) as usize).max(1);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let nyquist = sample_rate * 0.5;
        let max_hz = MESH_MAX_HZ.min(nyquist);
        let ratio = (max_hz / MESH_MIN_HZ).ln();
        let mesh_bins = (0..FFT_MESH_POINTS)
            .map(|i| {
                let t = i as f32 / (FFT_MESH_POINTS - 1) as f32;
                let freq = MESH_MIN_HZ * (ratio * t).exp();
                freq * FFT_SIZE as f32 / sample_rate
            })
            .collect();

        let mut analyzer = Self {
            sample_rate,
            history: vec![0.0; FFT_SIZE],
            write_pos: 0,
            samples_since_fft: 0,
            samples_per_fft,
            window: (0..FFT_SIZE).map(|i| hann_window(i, FFT_SIZE)).collect(),
            fft,
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            mesh_bins,
            spectrum: vec![0.0; FFT_MESH_POINTS],
            decay: 0.0,
            shift_db: 0.0,
        };
        analyzer.set_reactivity(200.0);
        analyzer
    }

    /// Smoothing time constant of the displayed spectrum
    pub fn set_reactivity(&mut self, reactivity_ms: f32) {
        let frame_ms = self.samples_per_fft as f32 * 1000.0 / self.sample_rate;
        self.decay = if reactivity_ms > 0.0 {
            (-frame_ms / reactivity_ms).exp()
        } else {
            0.0
        };
    }

    /// Level offset applied before mapping to 0..1
    pub fn set_shift(&mut self, shift_db: f32) {
        self.shift_db = shift_db;
    }

    /// Feed samples; returns true if at least one new spectrum was computed
    pub fn push_samples(&mut self, samples: &[f32]) -> bool {
        let mut updated = false;
        for &sample in samples {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % FFT_SIZE;
            self.samples_since_fft += 1;
            if self.samples_since_fft >= self.samples_per_fft {
                self.samples_since_fft = 0;
                self.analyze();
                updated = true;
            }
        }
        updated
    }

    fn analyze(&mut self) {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            // Oldest sample first
            let sample = self.history[(self.write_pos + i) % FFT_SIZE];
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        // A full-scale sine through a Hann window peaks near FFT_SIZE / 4
        let reference = FFT_SIZE as f32 / 4.0;
        let nyquist_bin = FFT_SIZE / 2;

        for (point, &bin) in self.spectrum.iter_mut().zip(&self.mesh_bins) {
            let lower = (bin.floor() as usize).min(nyquist_bin);
            let upper = (lower + 1).min(nyquist_bin);
            let frac = bin - bin.floor();
            let magnitude = self.buffer[lower].norm() * (1.0 - frac) + self.buffer[upper].norm() * frac;

            let db = 20.0 * (magnitude / reference).max(1e-10).log10() + self.shift_db;
            let level = ((db - FLOOR_DB) / -FLOOR_DB).clamp(0.0, 1.0);

            *point = if level > *point {
                level
            } else {
                *point * self.decay + level * (1.0 - self.decay)
            };
        }
    }

    /// Current smoothed spectrum, [`FFT_MESH_POINTS`] values in 0.0..=1.0
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum
    }

    /// Frequency in Hz of each mesh point
    pub fn frequencies(&self) -> Vec<f32> {
        self.mesh_bins
            .iter()
            .map(|&bin| bin * self.sample_rate / FFT_SIZE as f32)
            .collect()
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
        self.samples_since_fft = 0;
        self.spectrum.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 48000.0).sin())
            .collect()
    }

    #[test]
    fn test_analyzer_creation() {
        let analyzer = SpectrumAnalyzer::new(48000.0, 30);
        assert_eq!(analyzer.spectrum().len(), FFT_MESH_POINTS);
        assert!(analyzer.spectrum().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_spectrum_peaks_at_tone() {
        let mut analyzer = SpectrumAnalyzer::new(48000.0, 30);
        assert!(analyzer.push_samples(&sine(1000.0, FFT_SIZE * 2)));

        let freqs = analyzer.frequencies();
        let spectrum = analyzer.spectrum();
        let (peak_idx, _) = spectrum
            .iter()
            .enumerate()
            .fold((0, 0.0_f32), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });
        assert!((freqs[peak_idx] - 1000.0).abs() < 100.0, "peak at {} Hz", freqs[peak_idx]);
        assert!(spectrum[peak_idx] > 0.8);
    }

    #[test]
    fn test_frequencies_span_mesh() {
        let analyzer = SpectrumAnalyzer::new(48000.0, 30);
        let freqs = analyzer.frequencies();
        assert!((freqs[0] - MESH_MIN_HZ).abs() < 0.01);
        assert!((freqs[FFT_MESH_POINTS - 1] - MESH_MAX_HZ).abs() < 1.0);
    }

    #[test]
    fn test_reset() {
        let mut analyzer = SpectrumAnalyzer::new(48000.0, 30);
        analyzer.push_samples(&sine(440.0, FFT_SIZE));
        analyzer.reset();
        assert!(analyzer.spectrum().iter().all(|&v| v == 0.0));
    }
}
