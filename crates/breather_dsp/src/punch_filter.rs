//! Punch Filter
//!
//! Lookahead gate on the punch signal. Punch energy that stays under the
//! threshold is residual noise rather than a transient and gets pulled down.
//!
//! ```text
//!  reduction
//!     ▲
//!  max├──────┐
//!     │       ╲
//!     │        ╲   (linear in dB across the zone)
//!    0└─────────╲───────────► punch level (dB)
//!           T-W/2  T  T+W/2
//! ```
//!
//! Reduction is smoothed with an attack time (reduction falling, the
//! transient opens the gate) and a release time (reduction coming back).
//! The gain is computed from the undelayed punch signal and applied to
//! signals delayed by the lookahead, so the gate opens before the
//! transient arrives.

use crate::delay::DelayLine;
use crate::envelope::follow;
use crate::units::{db_to_gain, gain_to_db, millis_to_samples, time_constant_coeff};

/// Longest supported lookahead
pub const MAX_LOOKAHEAD_MS: f32 = 5.0;

/// Sample-domain punch filter settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PunchFilterSettings {
    pub lookahead: usize,
    /// Coefficient while reduction decreases
    pub attack_coeff: f32,
    /// Coefficient while reduction increases
    pub release_coeff: f32,
    pub threshold_db: f32,
    pub zone_db: f32,
    /// Maximum reduction as a positive dB amount
    pub reduction_db: f32,
}

impl PunchFilterSettings {
    pub fn from_millis(
        lookahead_ms: f32,
        attack_ms: f32,
        release_ms: f32,
        threshold_db: f32,
        zone_db: f32,
        reduction_db: f32,
        sample_rate: f32,
    ) -> Self {
        Self {
            lookahead: millis_to_samples(lookahead_ms, sample_rate),
            attack_coeff: time_constant_coeff(attack_ms, sample_rate),
            release_coeff: time_constant_coeff(release_ms, sample_rate),
            threshold_db,
            zone_db,
            reduction_db,
        }
    }

    /// Settings that pass the envelope through untouched
    pub fn transparent() -> Self {
        Self {
            lookahead: 0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            threshold_db: f32::NEG_INFINITY,
            zone_db: 0.0,
            reduction_db: 0.0,
        }
    }
}

/// Target reduction (positive dB) for a punch level
///
/// Full `reduction_db` at or below `threshold - zone/2`, none at or above
/// `threshold + zone/2`, linear in between.
#[inline]
pub fn zone_reduction_db(level_db: f32, threshold_db: f32, zone_db: f32, reduction_db: f32) -> f32 {
    if reduction_db <= 0.0 {
        return 0.0;
    }
    let half = zone_db.max(0.0) * 0.5;
    let low = threshold_db - half;
    let high = threshold_db + half;

    if level_db <= low {
        reduction_db
    } else if level_db >= high {
        0.0
    } else {
        reduction_db * (high - level_db) / (high - low)
    }
}

/// One output sample of the punch filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PunchFilterFrame {
    /// Delayed punch signal scaled by the gain (drives the beat processor)
    pub envelope: f32,
    /// Linear gain applied at this sample
    pub gain: f32,
}

/// Punch filter state for one detection lane
#[derive(Debug, Clone)]
pub struct PunchFilter {
    lookahead: DelayLine,
    /// Smoothed reduction in dB (positive)
    reduction: f32,
}

impl PunchFilter {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            lookahead: DelayLine::new(millis_to_samples(MAX_LOOKAHEAD_MS, sample_rate)),
            reduction: 0.0,
        }
    }

    pub fn configure(&mut self, settings: &PunchFilterSettings) {
        self.lookahead.set_delay(settings.lookahead);
    }

    /// Filter one punch sample
    #[inline]
    pub fn process(&mut self, punch: f32, settings: &PunchFilterSettings) -> PunchFilterFrame {
        let target = zone_reduction_db(
            gain_to_db(punch),
            settings.threshold_db,
            settings.zone_db,
            settings.reduction_db,
        );

        // Rising reduction is the release phase, falling reduction the attack
        self.reduction = follow(
            self.reduction,
            target,
            settings.release_coeff,
            settings.attack_coeff,
        );
        if !self.reduction.is_finite() {
            self.reduction = 0.0;
        }

        let gain = db_to_gain(-self.reduction);
        let delayed = self.lookahead.process(punch);
        PunchFilterFrame {
            envelope: delayed * gain,
            gain,
        }
    }

    /// Current smoothed reduction in dB
    pub fn reduction_db(&self) -> f32 {
        self.reduction
    }

    pub fn reset(&mut self) {
        self.lookahead.clear();
        self.reduction = 0.0;
    }
}
