//! Unit conversions and parameter smoothing helpers

/// Floor used when converting silence to decibels
pub const SILENCE_DB: f32 = -200.0;

/// Convert decibels to linear amplitude
/// Formula: amplitude = 10^(dB/20)
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels, clamping silence to [`SILENCE_DB`]
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain > 0.0 {
        (20.0 * gain.log10()).max(SILENCE_DB)
    } else {
        SILENCE_DB
    }
}

/// Convert a duration in milliseconds to a whole number of samples
#[inline]
pub fn millis_to_samples(ms: f32, sample_rate: f32) -> usize {
    (ms.max(0.0) * 0.001 * sample_rate).round() as usize
}

/// One-pole smoothing coefficient for a time constant
///
/// The smoother reaches ~63% of a step after `ms` milliseconds.
/// A zero time constant gives 0.0, i.e. the smoother jumps instantly.
#[inline]
pub fn time_constant_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = ms * 0.001 * sample_rate;
    if samples <= 0.0 || !samples.is_finite() {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

/// Linear ramp toward a target value
///
/// Used for every user-facing gain so that parameter snapshots never
/// cause zipper noise or clicks at block boundaries.
#[derive(Debug, Clone, Copy)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
    length: usize,
}

impl GainRamp {
    /// Create a ramp settled at `value`, moving over `length` samples per change
    pub fn new(value: f32, length: usize) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
            length: length.max(1),
        }
    }

    /// Start moving toward `target`. No-op if already heading there.
    pub fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;
        self.remaining = self.length;
        self.step = (target - self.current) / self.length as f32;
    }

    /// Jump straight to `value`
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.remaining = 0;
    }

    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    /// Multiply a buffer in place by the ramp
    #[inline]
    pub fn apply(&mut self, buffer: &mut [f32]) {
        if self.is_settled() {
            let gain = self.current;
            if gain != 1.0 {
                buffer.iter_mut().for_each(|s| *s *= gain);
            }
            return;
        }
        for sample in buffer.iter_mut() {
            *sample *= self.next_value();
        }
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }
}
