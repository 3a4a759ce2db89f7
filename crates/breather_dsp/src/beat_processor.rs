//! Beat Processor
//!
//! Upward amplifier driven by the punch filter's envelope. Level above the
//! threshold is scaled by the ratio into gain, capped at the maximum gain.
//!
//! # Time Shift
//!
//! A positive shift delays the gain envelope so amplification lands after
//! the transient onset. A negative shift instead delays the band audio by
//! the same amount, which moves the envelope earlier relative to it. Both
//! cases use a delay line sized for [`MAX_TIME_SHIFT_MS`].

use crate::delay::DelayLine;
use crate::envelope::follow;
use crate::units::{db_to_gain, gain_to_db, millis_to_samples, time_constant_coeff};

/// Largest absolute time shift
pub const MAX_TIME_SHIFT_MS: f32 = 5.0;

/// Sample-domain beat processor settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatProcessorSettings {
    /// Delay applied to the driving envelope (positive shift)
    pub envelope_delay: usize,
    /// Extra delay applied to the band audio (negative shift)
    pub audio_delay: usize,
    /// Coefficient while gain rises
    pub attack_coeff: f32,
    /// Coefficient while gain falls
    pub release_coeff: f32,
    pub threshold_db: f32,
    pub ratio: f32,
    pub max_gain_db: f32,
}

impl BeatProcessorSettings {
    pub fn from_millis(
        time_shift_ms: f32,
        attack_ms: f32,
        release_ms: f32,
        threshold_db: f32,
        ratio: f32,
        max_gain_db: f32,
        sample_rate: f32,
    ) -> Self {
        let shift = millis_to_samples(time_shift_ms.abs(), sample_rate);
        let (envelope_delay, audio_delay) = if time_shift_ms >= 0.0 {
            (shift, 0)
        } else {
            (0, shift)
        };
        Self {
            envelope_delay,
            audio_delay,
            attack_coeff: time_constant_coeff(attack_ms, sample_rate),
            release_coeff: time_constant_coeff(release_ms, sample_rate),
            threshold_db,
            ratio,
            max_gain_db,
        }
    }

    /// Settings that never amplify
    pub fn unity() -> Self {
        Self {
            envelope_delay: 0,
            audio_delay: 0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            threshold_db: f32::INFINITY,
            ratio: 0.0,
            max_gain_db: 0.0,
        }
    }
}

/// Target amplification in dB for an envelope level
#[inline]
pub fn amplification_db(level_db: f32, threshold_db: f32, ratio: f32, max_gain_db: f32) -> f32 {
    if level_db <= threshold_db || ratio <= 0.0 {
        return 0.0;
    }
    ((level_db - threshold_db) * ratio).min(max_gain_db).max(0.0)
}

/// Beat processor state for one detection lane
#[derive(Debug, Clone)]
pub struct BeatProcessor {
    shift: DelayLine,
    /// Smoothed gain in dB
    gain_db: f32,
}

impl BeatProcessor {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            shift: DelayLine::new(millis_to_samples(MAX_TIME_SHIFT_MS, sample_rate)),
            gain_db: 0.0,
        }
    }

    pub fn configure(&mut self, settings: &BeatProcessorSettings) {
        self.shift.set_delay(settings.envelope_delay);
    }

    /// Feed one envelope sample and return the linear gain
    #[inline]
    pub fn process(&mut self, envelope: f32, settings: &BeatProcessorSettings) -> f32 {
        let shifted = self.shift.process(envelope);
        let target = amplification_db(
            gain_to_db(shifted),
            settings.threshold_db,
            settings.ratio,
            settings.max_gain_db,
        );

        self.gain_db = follow(
            self.gain_db,
            target,
            settings.attack_coeff,
            settings.release_coeff,
        );
        if !self.gain_db.is_finite() {
            self.gain_db = 0.0;
        }

        db_to_gain(self.gain_db)
    }

    /// Current smoothed gain in dB
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn reset(&mut self) {
        self.shift.clear();
        self.gain_db = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplification_curve() {
        assert_eq!(amplification_db(-30.0, -24.0, 2.0, 6.0), 0.0);
        assert_eq!(amplification_db(-22.0, -24.0, 2.0, 6.0), 4.0);
        assert_eq!(amplification_db(-10.0, -24.0, 2.0, 6.0), 6.0);
    }

    #[test]
    fn test_ratio_zero_is_unity() {
        let settings = BeatProcessorSettings::from_millis(0.0, 10.0, 20.0, -60.0, 0.0, 24.0, 48000.0);
        let mut bp = BeatProcessor::new(48000.0);
        bp.configure(&settings);
        for i in 0..2000 {
            let gain = bp.process((i % 50) as f32 * 0.02, &settings);
            assert_eq!(gain, 1.0);
        }
    }

    #[test]
    fn test_infinite_threshold_is_unity() {
        let settings = BeatProcessorSettings::unity();
        let mut bp = BeatProcessor::new(48000.0);
        bp.configure(&settings);
        for _ in 0..100 {
            assert_eq!(bp.process(1.0, &settings), 1.0);
        }
    }

    #[test]
    fn test_gain_attack_then_release() {
        let settings = BeatProcessorSettings::from_millis(0.0, 10.0, 20.0, -30.0, 1.0, 6.0, 48000.0);
        let mut bp = BeatProcessor::new(48000.0);
        bp.configure(&settings);

        // 10 attack time constants
        for _ in 0..4800 {
            bp.process(0.5, &settings);
        }
        assert!((bp.gain_db() - 6.0).abs() < 0.01);

        // 10 release time constants
        for _ in 0..9600 {
            bp.process(0.0, &settings);
        }
        assert!(bp.gain_db() < 0.01);
    }

    #[test]
    fn test_positive_shift_delays_gain() {
        let settings = BeatProcessorSettings::from_millis(1.0, 0.0, 0.0, -30.0, 1.0, 6.0, 48000.0);
        assert_eq!(settings.envelope_delay, 48);
        assert_eq!(settings.audio_delay, 0);

        let mut bp = BeatProcessor::new(48000.0);
        bp.configure(&settings);
        let gains: Vec<f32> = (0..100).map(|_| bp.process(0.5, &settings)).collect();
        assert_eq!(gains[47], 1.0);
        assert!(gains[48] > 1.9);
    }

    #[test]
    fn test_negative_shift_delays_audio() {
        let settings = BeatProcessorSettings::from_millis(-2.0, 10.0, 20.0, -30.0, 1.0, 6.0, 48000.0);
        assert_eq!(settings.envelope_delay, 0);
        assert_eq!(settings.audio_delay, 96);
    }

    #[test]
    fn test_attack_and_release_time_constants() {
        let (attack_ms, release_ms, max_gain) = (10.0, 20.0, 6.0);
        let settings =
            BeatProcessorSettings::from_millis(0.0, attack_ms, release_ms, -30.0, 1.0, max_gain, 48000.0);
        let mut bp = BeatProcessor::new(48000.0);
        bp.configure(&settings);

        // Rising: 1 - 1/e of the step after one attack time
        for _ in 0..millis_to_samples(attack_ms, 48000.0) {
            bp.process(0.5, &settings);
        }
        let expected = max_gain * (1.0 - (-1.0_f32).exp());
        assert!(
            (bp.gain_db() - expected).abs() < 0.02,
            "after attack: {} vs {}",
            bp.gain_db(),
            expected
        );

        for _ in 0..48000 {
            bp.process(0.5, &settings);
        }
        let settled = bp.gain_db();
        assert!((settled - max_gain).abs() < 1e-3);

        // Falling: down to 1/e of the level after one release time
        for _ in 0..millis_to_samples(release_ms, 48000.0) {
            bp.process(0.0, &settings);
        }
        let expected = settled * (-1.0_f32).exp();
        assert!(
            (bp.gain_db() - expected).abs() < 0.02,
            "after release: {} vs {}",
            bp.gain_db(),
            expected
        );
    }
}
