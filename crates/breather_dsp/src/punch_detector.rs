//! Punch Detector
//!
//! Compares a short-window RMS against a long-window RMS of the same band.
//! A transient raises the short window well before the long one catches up:
//!
//! ```text
//! punch = max(0, short_rms - bias * long_rms) * makeup
//! ```
//!
//! The two RMS estimates are exposed separately so channels can be linked
//! (averaged) before the punch signal is formed.

use crate::envelope::RmsEnvelope;
use crate::units::{db_to_gain, millis_to_samples};

/// Longest supported long-term window
pub const MAX_LONG_WINDOW_MS: f32 = 1000.0;

/// Longest supported short-term window
pub const MAX_SHORT_WINDOW_MS: f32 = 20.0;

/// Sample-domain detector settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PunchDetectorSettings {
    pub long_window: usize,
    pub short_window: usize,
    /// Linear multiplier applied to the long RMS before subtraction
    pub bias: f32,
    /// Linear makeup gain
    pub makeup: f32,
}

impl PunchDetectorSettings {
    /// Build settings from user-facing units
    pub fn from_millis(
        long_ms: f32,
        short_ms: f32,
        bias: f32,
        makeup_db: f32,
        sample_rate: f32,
    ) -> Self {
        Self {
            long_window: millis_to_samples(long_ms, sample_rate).max(1),
            short_window: millis_to_samples(short_ms, sample_rate).max(1),
            bias,
            makeup: db_to_gain(makeup_db),
        }
    }
}

/// Punch signal from a pair of RMS estimates
#[inline]
pub fn punch_signal(short_rms: f32, long_rms: f32, bias: f32, makeup: f32) -> f32 {
    (short_rms - bias * long_rms).max(0.0) * makeup
}

/// Per-channel RMS pair feeding the punch signal
#[derive(Debug, Clone)]
pub struct PunchDetector {
    long: RmsEnvelope,
    short: RmsEnvelope,
}

impl PunchDetector {
    /// Allocate windows large enough for the maximum lengths at `sample_rate`
    pub fn new(sample_rate: f32) -> Self {
        Self {
            long: RmsEnvelope::new(millis_to_samples(MAX_LONG_WINDOW_MS, sample_rate).max(1)),
            short: RmsEnvelope::new(millis_to_samples(MAX_SHORT_WINDOW_MS, sample_rate).max(1)),
        }
    }

    /// Ramp both windows toward new lengths
    pub fn configure(&mut self, settings: &PunchDetectorSettings) {
        self.long.set_window(settings.long_window);
        self.short.set_window(settings.short_window);
    }

    /// Snap both windows to their lengths (fresh state only)
    pub fn configure_immediate(&mut self, settings: &PunchDetectorSettings) {
        self.long.set_window_immediate(settings.long_window);
        self.short.set_window_immediate(settings.short_window);
    }

    /// Feed one sample, returning `(short_rms, long_rms)`
    #[inline]
    pub fn process(&mut self, sample: f32) -> (f32, f32) {
        (self.short.process(sample), self.long.process(sample))
    }

    /// Feed a block, writing both RMS curves
    pub fn process_block(&mut self, input: &[f32], short: &mut [f32], long: &mut [f32]) {
        for ((&x, s), l) in input.iter().zip(short.iter_mut()).zip(long.iter_mut()) {
            let (sr, lr) = self.process(x);
            *s = sr;
            *l = lr;
        }
    }

    /// Feed one sample and form the punch signal directly (unlinked use)
    #[inline]
    pub fn punch(&mut self, sample: f32, settings: &PunchDetectorSettings) -> f32 {
        let (short, long) = self.process(sample);
        punch_signal(short, long, settings.bias, settings.makeup)
    }

    pub fn reset(&mut self) {
        self.long.reset();
        self.short.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(sample_rate: f32) -> (PunchDetector, PunchDetectorSettings) {
        let settings = PunchDetectorSettings::from_millis(400.0, 10.0, 1.0, 0.0, sample_rate);
        let mut pd = PunchDetector::new(sample_rate);
        pd.configure_immediate(&settings);
        (pd, settings)
    }

    #[test]
    fn test_punch_signal_formula() {
        assert!((punch_signal(0.5, 0.2, 1.0, 1.0) - 0.3).abs() < 1e-6);
        assert_eq!(punch_signal(0.1, 0.2, 1.0, 1.0), 0.0);
        assert!((punch_signal(0.5, 0.2, 2.0, 2.0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_spike_gives_positive_punch() {
        let (mut pd, settings) = detector(48000.0);
        // Quiet bed
        for i in 0..48000 {
            pd.punch(0.01 * ((i % 7) as f32 - 3.0), &settings);
        }
        // Sudden loud burst
        let mut peak = 0.0_f32;
        for i in 0..480 {
            let x = 0.8 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin();
            peak = peak.max(pd.punch(x, &settings));
        }
        assert!(peak > 0.1, "peak punch {}", peak);
    }

    #[test]
    fn test_steady_signal_converges_to_zero() {
        let (mut pd, settings) = detector(48000.0);
        let mut last = 1.0;
        for _ in 0..(48000 / 2) {
            last = pd.punch(0.5, &settings);
        }
        assert!(last < 1e-4, "steady-state punch {}", last);
    }

    #[test]
    fn test_block_matches_samples() {
        let (mut a, _) = detector(48000.0);
        let (mut b, _) = detector(48000.0);
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin()).collect();
        let mut short = vec![0.0; 256];
        let mut long = vec![0.0; 256];
        a.process_block(&input, &mut short, &mut long);
        for (i, &x) in input.iter().enumerate() {
            let (s, l) = b.process(x);
            assert_eq!(s, short[i]);
            assert_eq!(l, long[i]);
        }
    }
}
